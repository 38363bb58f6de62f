//! TOML configuration.
//!
//! Every section is optional; a missing config file means defaults
//! throughout.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:7340"
//!
//! [storage]
//! default_region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//!
//! [search]
//! archive_extension = ".zip"
//! archive_timeout_secs = 300
//! workers = 4
//! max_entry_bytes = 67108864      # per entry, larger entries are skipped
//! max_archive_bytes = 1073741824  # per archive, larger archives are skipped
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Region used when a request does not carry one.
    #[serde(default = "default_region")]
    pub default_region: String,
    /// S3-compatible endpoint (MinIO, LocalStack). Switches to path-style
    /// addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_region: default_region(),
            endpoint_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,
    /// Entry suffixes treated as text. Everything else inside an archive is
    /// ignored.
    #[serde(default = "default_text_extensions")]
    pub text_extensions: Vec<String>,
    #[serde(default = "default_archive_timeout_secs")]
    pub archive_timeout_secs: u64,
    /// Archives fetched and decoded concurrently within one job.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
    /// Total decompressed text kept from one archive before it is skipped.
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
    #[serde(default = "default_verify_connection")]
    pub verify_connection: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            archive_extension: default_archive_extension(),
            text_extensions: default_text_extensions(),
            archive_timeout_secs: default_archive_timeout_secs(),
            workers: default_workers(),
            max_entry_bytes: default_max_entry_bytes(),
            max_archive_bytes: default_max_archive_bytes(),
            verify_connection: default_verify_connection(),
        }
    }
}

fn default_archive_extension() -> String {
    ".zip".to_string()
}
fn default_text_extensions() -> Vec<String> {
    [".txt", ".csv", ".log", ".md", ".json", ".xml", ".html", ".htm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_archive_timeout_secs() -> u64 {
    300
}
fn default_workers() -> usize {
    4
}
fn default_max_entry_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_max_archive_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_verify_connection() -> bool {
    true
}

impl Config {
    /// Load `path` when given, otherwise return defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(p) => load_config(p),
            None => Ok(Config::default()),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    if config.search.workers == 0 {
        anyhow::bail!("search.workers must be >= 1");
    }

    if config.search.archive_timeout_secs == 0 {
        anyhow::bail!("search.archive_timeout_secs must be >= 1");
    }

    if config.search.archive_extension.trim().is_empty() {
        anyhow::bail!("search.archive_extension must not be empty");
    }

    if config.search.text_extensions.iter().all(|e| e.trim().is_empty()) {
        anyhow::bail!("search.text_extensions must not be empty");
    }

    if config.search.max_entry_bytes == 0 {
        anyhow::bail!("search.max_entry_bytes must be > 0");
    }

    if config.search.max_archive_bytes == 0 {
        anyhow::bail!("search.max_archive_bytes must be > 0");
    }

    if config.storage.request_timeout_secs == 0 {
        anyhow::bail!("storage.request_timeout_secs must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_gives_defaults() {
        let file = write_config("");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
        assert_eq!(cfg.storage.default_region, "us-east-1");
        assert_eq!(cfg.search.archive_extension, ".zip");
        assert_eq!(cfg.search.text_extensions.len(), 8);
        assert_eq!(cfg.search.workers, 4);
        assert!(cfg.search.verify_connection);
    }

    #[test]
    fn overrides_are_applied() {
        let file = write_config(
            r#"
[storage]
endpoint_url = "http://localhost:9000"

[search]
workers = 2
text_extensions = [".txt"]
"#,
        );
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(
            cfg.storage.endpoint_url.as_deref(),
            Some("http://localhost:9000")
        );
        assert_eq!(cfg.search.workers, 2);
        assert_eq!(cfg.search.text_extensions, vec![".txt"]);
        assert_eq!(cfg.search.archive_timeout_secs, 300);
    }

    #[test]
    fn zero_workers_rejected() {
        let file = write_config("[search]\nworkers = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("search.workers"));
    }

    #[test]
    fn empty_text_extensions_rejected() {
        let file = write_config("[search]\ntext_extensions = []\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("search.text_extensions must not be empty"));

        let file = write_config("[search]\ntext_extensions = [\"  \"]\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn zero_archive_limit_rejected() {
        let file = write_config("[search]\nmax_archive_bytes = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("search.max_archive_bytes"));
    }

    #[test]
    fn missing_path_uses_defaults() {
        let cfg = Config::load_or_default(None).unwrap();
        assert_eq!(cfg.search.max_entry_bytes, 64 * 1024 * 1024);
        assert_eq!(cfg.search.max_archive_bytes, 1024 * 1024 * 1024);
    }
}
