//! Search progress reporting for the CLI.
//!
//! `zipsweep search` polls its job the same way an HTTP client would and
//! forwards each change to a [`SearchProgressReporter`]. Progress is emitted
//! on **stderr** so stdout (or the CSV output) stays parseable for scripts.

use std::io::Write;

use crate::models::JobSnapshot;

/// One observed change in a running job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchProgressEvent {
    pub progress: u8,
    pub message: Option<String>,
    pub identifiers_found: u64,
    pub archives_scanned: u64,
    pub archives_skipped: u64,
}

impl From<&JobSnapshot> for SearchProgressEvent {
    fn from(snapshot: &JobSnapshot) -> Self {
        Self {
            progress: snapshot.progress,
            message: snapshot.message.clone(),
            identifiers_found: snapshot.results.len() as u64,
            archives_scanned: snapshot.archives_scanned as u64,
            archives_skipped: snapshot.archives_skipped as u64,
        }
    }
}

/// Reports search progress. Implementations write to stderr (human or JSON).
pub trait SearchProgressReporter: Send + Sync {
    fn report(&self, event: &SearchProgressEvent);
}

/// Human-friendly progress on stderr:
/// `[ 45%] Processing zip 3/8: exports/a.zip  (1,204 scanned, 2 skipped, 5 found)`.
pub struct StderrProgress;

impl SearchProgressReporter for StderrProgress {
    fn report(&self, event: &SearchProgressEvent) {
        let line = format!(
            "[{:>3}%] {}  ({} scanned, {} skipped, {} found)\n",
            event.progress,
            event.message.as_deref().unwrap_or("working"),
            format_number(event.archives_scanned),
            format_number(event.archives_skipped),
            format_number(event.identifiers_found),
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SearchProgressReporter for JsonProgress {
    fn report(&self, event: &SearchProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "progress": event.progress,
            "message": event.message,
            "archives_scanned": event.archives_scanned,
            "archives_skipped": event.archives_skipped,
            "identifiers_found": event.identifiers_found,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SearchProgressReporter for NoProgress {
    fn report(&self, _event: &SearchProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SearchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}' (expected human, json or off)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn parses_modes() {
        assert_eq!("JSON".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert_eq!("off".parse::<ProgressMode>().unwrap(), ProgressMode::Off);
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
