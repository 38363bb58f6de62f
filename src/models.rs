//! Core data models used throughout zipsweep.
//!
//! These types represent the search requests, archive references, matches,
//! and job state that flow through the search pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identifiers::IdentifierFormat;

/// Opaque job identifier handed back at submission.
pub type JobId = Uuid;

/// Storage credentials supplied with every request. Never persisted.
#[derive(Clone, Deserialize, Default)]
pub struct Credentials {
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Falls back to `[storage].default_region` when absent.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Immutable job submission.
#[derive(Clone, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    /// Archive password; `None` or empty means the archives are not encrypted.
    #[serde(default)]
    pub password: Option<String>,
    /// Raw identifier text as uploaded by the user.
    #[serde(default)]
    pub identifiers: String,
    #[serde(default)]
    pub format: IdentifierFormat,
}

impl std::fmt::Debug for SearchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchRequest")
            .field("credentials", &self.credentials)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("identifiers_len", &self.identifiers.len())
            .field("format", &self.format)
            .finish()
    }
}

/// A candidate archive object found by the bucket enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveRef {
    /// Full object key (path within bucket).
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One file decoded out of an archive. Dropped as soon as it is scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntry {
    /// Path inside the archive.
    pub path: String,
    pub content: String,
}

/// A single place where an identifier was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub identifier: String,
    /// Object key of the archive that contained the match.
    pub archive_key: String,
    /// Path of the matching file inside the archive.
    pub entry_path: String,
    /// `s3://<bucket>/<key>` of the archive.
    pub storage_path: String,
}

/// All occurrences of one identifier, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub identifier: String,
    pub occurrences: Vec<Occurrence>,
}

/// Ordered, merge-only collection of [`SearchResult`]s.
///
/// Identifiers keep the order in which they were first discovered and each
/// identifier owns exactly one [`SearchResult`].
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    results: Vec<SearchResult>,
    index: HashMap<String, usize>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append occurrences, creating a [`SearchResult`] the first time an
    /// identifier is seen.
    pub fn merge(&mut self, occurrences: impl IntoIterator<Item = Occurrence>) {
        for occurrence in occurrences {
            match self.index.get(&occurrence.identifier) {
                Some(&pos) => self.results[pos].occurrences.push(occurrence),
                None => {
                    self.index
                        .insert(occurrence.identifier.clone(), self.results.len());
                    self.results.push(SearchResult {
                        identifier: occurrence.identifier.clone(),
                        occurrences: vec![occurrence],
                    });
                }
            }
        }
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    /// Number of distinct identifiers found so far.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Total number of occurrences across all identifiers.
    pub fn occurrence_count(&self) -> usize {
        self.results.iter().map(|r| r.occurrences.len()).sum()
    }
}

/// Lifecycle state of a search job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Stopped on user request. Partial results are kept.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an archive was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Download,
    PasswordRequired,
    WrongPassword,
    UnsupportedEncryption,
    Corrupt,
    Unsupported,
    Timeout,
}

/// Per-archive skip record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveDiagnostic {
    pub key: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Point-in-time copy of a job, returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub diagnostics: Vec<ArchiveDiagnostic>,
    pub folders_total: usize,
    pub archives_scanned: usize,
    pub archives_skipped: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Compact listing row for `GET /jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub identifiers_found: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occ(id: &str, archive: &str, entry: &str) -> Occurrence {
        Occurrence {
            identifier: id.to_string(),
            archive_key: archive.to_string(),
            entry_path: entry.to_string(),
            storage_path: format!("s3://bucket/{}", archive),
        }
    }

    #[test]
    fn merge_groups_by_identifier_in_discovery_order() {
        let mut set = ResultSet::new();
        set.merge(vec![occ("ID123", "file1.zip", "text1.txt")]);
        set.merge(vec![
            occ("XYZ", "file2.zip", "a.txt"),
            occ("ID123", "file2.zip", "text2.txt"),
        ]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.occurrence_count(), 3);
        let first = &set.results()[0];
        assert_eq!(first.identifier, "ID123");
        assert_eq!(first.occurrences[0].archive_key, "file1.zip");
        assert_eq!(first.occurrences[1].archive_key, "file2.zip");
        assert_eq!(set.results()[1].identifier, "XYZ");
    }

    #[test]
    fn empty_merge_creates_nothing() {
        let mut set = ResultSet::new();
        set.merge(Vec::new());
        assert!(set.is_empty());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn request_debug_redacts_secrets() {
        let req = SearchRequest {
            credentials: Credentials {
                access_key: "AKIA".to_string(),
                secret_key: "very-secret".to_string(),
                region: None,
                session_token: Some("tok".to_string()),
            },
            bucket: "b".to_string(),
            prefix: String::new(),
            password: Some("hunter2".to_string()),
            identifiers: "A\nB".to_string(),
            format: IdentifierFormat::Line,
        };
        let dbg = format!("{:?}", req);
        assert!(!dbg.contains("very-secret"));
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("tok\""));
    }
}
