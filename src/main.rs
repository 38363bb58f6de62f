//! # zipsweep CLI
//!
//! ## Usage
//!
//! ```bash
//! zipsweep --config ./zipsweep.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `zipsweep serve` | Start the HTTP server |
//! | `zipsweep search` | Run one search in the foreground and write a CSV report |
//! | `zipsweep buckets` | List buckets visible to the environment credentials |
//!
//! Credentials come from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
//! `AWS_SESSION_TOKEN` and `AWS_REGION`; the archive password from
//! `ZIPSWEEP_PASSWORD`. Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use zipsweep::config::{self, Config};
use zipsweep::identifiers::IdentifierFormat;
use zipsweep::jobs::JobRegistry;
use zipsweep::models::{Credentials, JobStatus, SearchRequest};
use zipsweep::progress::{format_number, ProgressMode, SearchProgressEvent};
use zipsweep::report;
use zipsweep::server;
use zipsweep::storage::s3::S3Provider;
use zipsweep::storage::{ObjectStore, StoreProvider};

/// How often `search` polls its job.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Search password-protected ZIP archives in S3 for identifiers.
#[derive(Parser)]
#[command(name = "zipsweep", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one search in the foreground.
    Search {
        #[arg(long)]
        bucket: String,

        /// Key prefix to search under. Empty searches the whole bucket.
        #[arg(long, default_value = "")]
        prefix: String,

        /// File with the identifiers to look for.
        #[arg(long)]
        identifiers: PathBuf,

        /// Identifier file format: `line` (one per line) or `csv` (first column).
        #[arg(long, default_value = "line")]
        format: IdentifierFormat,

        /// Write the CSV report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Progress on stderr: human, json or off. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// List buckets visible to the environment credentials.
    Buckets,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn env_credentials() -> Credentials {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    Credentials {
        access_key: var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
        secret_key: var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
        region: var("AWS_REGION").or_else(|| var("AWS_DEFAULT_REGION")),
        session_token: var("AWS_SESSION_TOKEN"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut cfg = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
                config::validate(&cfg)?;
            }
            server::run_server(&cfg).await?;
        }
        Commands::Buckets => {
            let credentials = env_credentials();
            if credentials.access_key.is_empty() || credentials.secret_key.is_empty() {
                bail!("AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set");
            }
            let provider = S3Provider::new(cfg.storage.clone())?;
            let store = provider.connect(&credentials)?;
            let buckets = store.list_buckets().await.context("failed to list buckets")?;
            if buckets.is_empty() {
                println!("No buckets visible to these credentials.");
            }
            for bucket in buckets {
                println!("{}", bucket);
            }
        }
        Commands::Search {
            bucket,
            prefix,
            identifiers,
            format,
            output,
            progress,
        } => {
            let text = std::fs::read_to_string(&identifiers).with_context(|| {
                format!("failed to read identifier file: {}", identifiers.display())
            })?;
            let request = SearchRequest {
                credentials: env_credentials(),
                bucket,
                prefix,
                password: std::env::var("ZIPSWEEP_PASSWORD").ok(),
                identifiers: text,
                format,
            };
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            run_search(cfg, request, mode, output).await?;
        }
    }

    Ok(())
}

/// Submit one job to a local registry and poll it to completion, exactly as
/// an HTTP client would.
async fn run_search(
    cfg: Config,
    request: SearchRequest,
    mode: ProgressMode,
    output: Option<PathBuf>,
) -> Result<()> {
    let provider = S3Provider::new(cfg.storage.clone())?;
    let registry = JobRegistry::new(Arc::new(cfg), Arc::new(provider));
    let job_id = registry.submit(request)?;
    let reporter = mode.reporter();

    let mut last: Option<SearchProgressEvent> = None;
    let snapshot = loop {
        let snapshot = registry
            .status(&job_id)
            .context("job disappeared from the registry")?;
        let event = SearchProgressEvent::from(&snapshot);
        if last.as_ref() != Some(&event) {
            reporter.report(&event);
            last = Some(event);
        }
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    for diagnostic in &snapshot.diagnostics {
        eprintln!("skipped {}: {}", diagnostic.key, diagnostic.message);
    }

    println!(
        "{} identifiers found, {} archives scanned, {} skipped",
        format_number(snapshot.results.len() as u64),
        format_number(snapshot.archives_scanned as u64),
        format_number(snapshot.archives_skipped as u64),
    );
    for result in &snapshot.results {
        println!(
            "  {:<24} {} occurrence(s)",
            result.identifier,
            result.occurrences.len()
        );
    }

    let csv = report::to_csv(&snapshot.results)?;
    match output {
        Some(path) => {
            std::fs::write(&path, &csv)
                .with_context(|| format!("failed to write report: {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{}", csv),
    }

    match snapshot.status {
        JobStatus::Completed => Ok(()),
        JobStatus::Cancelled => bail!("search was cancelled"),
        _ => bail!(
            "search failed: {}",
            snapshot.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
