//! Search job driver.
//!
//! Runs one job from `processing` to a terminal status:
//!
//! 1. Optionally verify the store is reachable (`ListBuckets`).
//! 2. Resolve folders under the prefix, with the empty-listing fallback.
//!    Progress jumps to 10.
//! 3. For each folder, list archives and fetch, decode and scan them. Up to
//!    `search.workers` archives are in flight at once, but results are merged
//!    strictly in listing order. The remaining 80% of the progress bar is
//!    spread over the folder × archive iteration space.
//! 4. Progress 100, `completed`.
//!
//! Archive-level problems (download failure, wrong password, corrupt data,
//! timeout) are recorded as diagnostics and skipped. Only failing to reach
//! the store or to enumerate it fails the job, and partial results survive
//! that failure.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::archive::ArchiveDecoder;
use crate::config::SearchConfig;
use crate::enumerate;
use crate::error::{DecodeError, StorageError};
use crate::jobs::JobHandle;
use crate::matcher::PatternMatcher;
use crate::models::{ArchiveDiagnostic, ArchiveRef, DiagnosticKind, Occurrence};
use crate::scanner::{self, TextFilter};
use crate::storage::ObjectStore;

/// Progress reported once folders are resolved.
const FOLDERS_RESOLVED_PROGRESS: u8 = 10;
/// Share of the progress bar spread across archive processing.
const ARCHIVE_PROGRESS_SPAN: usize = 80;

/// What one job searches for and where.
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub bucket: String,
    pub prefix: String,
    pub password: Option<String>,
    pub identifiers: Vec<String>,
}

/// Result of processing a single archive.
enum ArchiveOutcome {
    Scanned(Vec<Occurrence>),
    Skipped(ArchiveDiagnostic),
    Cancelled,
}

/// Job-fatal failure.
struct Abort(String);

enum RunEnd {
    Finished,
    Cancelled,
}

/// Drives one job against one store.
pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    decoder: Arc<dyn ArchiveDecoder>,
    settings: SearchConfig,
}

/// Overall progress after `archives_done` of `archives_in_folder` archives in
/// the folder following `folders_done` completed folders.
///
/// `10 + floor(80 * (folders_done + archives_done / archives_in_folder) / total_folders)`,
/// computed in integers so repeated runs agree exactly.
pub fn overall_progress(
    folders_done: usize,
    archives_done: usize,
    archives_in_folder: usize,
    total_folders: usize,
) -> u8 {
    let total_folders = total_folders.max(1);
    let span = ARCHIVE_PROGRESS_SPAN;
    let value = if archives_in_folder == 0 {
        span * folders_done / total_folders
    } else {
        span * (folders_done * archives_in_folder + archives_done)
            / (total_folders * archives_in_folder)
    };
    (FOLDERS_RESOLVED_PROGRESS as usize + value.min(span)) as u8
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        decoder: Arc<dyn ArchiveDecoder>,
        settings: SearchConfig,
    ) -> Self {
        Self {
            store,
            decoder,
            settings,
        }
    }

    /// Run the job to a terminal status. Never returns an error: every
    /// outcome is written to `job`.
    pub async fn run(&self, job: &JobHandle, plan: SearchPlan) {
        let job_id = job.id();
        job.start();
        tracing::info!(job_id = %job_id, bucket = %plan.bucket, "search started");

        match self.search(job, &plan).await {
            Ok(RunEnd::Finished) => {
                let (found, occurrences) = {
                    let snapshot = job.snapshot();
                    let occ: usize = snapshot.results.iter().map(|r| r.occurrences.len()).sum();
                    (snapshot.results.len(), occ)
                };
                job.update(|s| {
                    s.set_message(format!(
                        "Search completed: {} identifiers found, {} occurrences",
                        found, occurrences
                    ))
                });
                job.complete();
                tracing::info!(job_id = %job_id, found, occurrences, "search completed");
            }
            Ok(RunEnd::Cancelled) => {
                job.cancel();
                tracing::info!(job_id = %job_id, "search stopped by user");
            }
            Err(Abort(message)) => {
                tracing::error!(job_id = %job_id, error = %message, "search failed");
                job.update(|s| s.set_message(format!("Error during search: {}", message)));
                job.fail(message);
            }
        }
    }

    async fn search(&self, job: &JobHandle, plan: &SearchPlan) -> Result<RunEnd, Abort> {
        if self.settings.verify_connection {
            job.update(|s| s.set_message("Connecting to storage"));
            self.store
                .list_buckets()
                .await
                .map_err(|e| Abort(format!("failed to connect to storage: {}", e)))?;
        }

        job.update(|s| s.set_message(format!("Listing folders in bucket {}", plan.bucket)));
        let folders = enumerate::list_folders(self.store.as_ref(), &plan.bucket, &plan.prefix)
            .await
            .map_err(|e| listing_abort(&plan.bucket, &plan.prefix, e))?;
        let folders = enumerate::resolve_folders(folders, &plan.prefix);
        let total_folders = folders.len();

        job.update(|s| {
            s.set_folders_total(total_folders);
            s.advance(FOLDERS_RESOLVED_PROGRESS);
            s.set_message(format!("Found {} folders to search", total_folders));
        });

        let matcher = Arc::new(PatternMatcher::new(&plan.identifiers));
        let filter = TextFilter::new(&self.settings.text_extensions);

        for (folder_idx, folder) in folders.iter().enumerate() {
            if job.is_cancel_requested() {
                return Ok(RunEnd::Cancelled);
            }
            job.update(|s| {
                s.set_message(format!(
                    "Searching folder {}/{}: {}",
                    folder_idx + 1,
                    total_folders,
                    folder
                ))
            });

            let archives = enumerate::list_objects_by_extension(
                self.store.as_ref(),
                &plan.bucket,
                folder,
                &self.settings.archive_extension,
            )
            .await
            .map_err(|e| listing_abort(&plan.bucket, folder, e))?;

            if archives.is_empty() {
                tracing::debug!(job_id = %job.id(), folder = %folder, "no archives in folder");
                job.update(|s| {
                    s.set_message(format!("No archives found in folder {}", folder));
                    s.advance(overall_progress(folder_idx + 1, 0, 0, total_folders));
                });
                continue;
            }

            if let RunEnd::Cancelled = self
                .search_folder(job, plan, &matcher, &filter, folder_idx, total_folders, archives)
                .await
            {
                return Ok(RunEnd::Cancelled);
            }
        }

        Ok(RunEnd::Finished)
    }

    #[allow(clippy::too_many_arguments)]
    async fn search_folder(
        &self,
        job: &JobHandle,
        plan: &SearchPlan,
        matcher: &Arc<PatternMatcher>,
        filter: &TextFilter,
        folder_idx: usize,
        total_folders: usize,
        archives: Vec<ArchiveRef>,
    ) -> RunEnd {
        let total = archives.len();
        let timeout = Duration::from_secs(self.settings.archive_timeout_secs);

        let mut outcomes = stream::iter(archives.into_iter().enumerate())
            .map(|(idx, archive)| {
                let matcher = matcher.clone();
                let filter = filter.clone();
                async move {
                    if job.is_cancel_requested() {
                        return (archive, ArchiveOutcome::Cancelled);
                    }
                    job.update(|s| {
                        s.set_message(format!(
                            "Processing zip {}/{}: {}",
                            idx + 1,
                            total,
                            archive.key
                        ))
                    });
                    let outcome = self
                        .process_archive(plan, &archive, matcher, filter, timeout)
                        .await;
                    (archive, outcome)
                }
            })
            .buffered(self.settings.workers.max(1));

        let mut done = 0;
        while let Some((archive, outcome)) = outcomes.next().await {
            if job.is_cancel_requested() {
                return RunEnd::Cancelled;
            }
            done += 1;
            let progress = overall_progress(folder_idx, done, total, total_folders);
            match outcome {
                ArchiveOutcome::Scanned(occurrences) => {
                    if !occurrences.is_empty() {
                        tracing::info!(
                            job_id = %job.id(),
                            key = %archive.key,
                            matches = occurrences.len(),
                            "matches found"
                        );
                    }
                    job.update(|s| {
                        s.merge(occurrences);
                        s.advance(progress);
                    });
                }
                ArchiveOutcome::Skipped(diagnostic) => {
                    tracing::warn!(
                        job_id = %job.id(),
                        key = %diagnostic.key,
                        kind = ?diagnostic.kind,
                        error = %diagnostic.message,
                        "archive skipped"
                    );
                    job.update(|s| {
                        s.record_skip(diagnostic);
                        s.advance(progress);
                    });
                }
                ArchiveOutcome::Cancelled => return RunEnd::Cancelled,
            }
        }

        RunEnd::Finished
    }

    /// Download, decode and scan one archive under the per-archive timeout.
    async fn process_archive(
        &self,
        plan: &SearchPlan,
        archive: &ArchiveRef,
        matcher: Arc<PatternMatcher>,
        filter: TextFilter,
        timeout: Duration,
    ) -> ArchiveOutcome {
        let key = archive.key.clone();
        let skipped = |kind: DiagnosticKind, message: String| {
            ArchiveOutcome::Skipped(ArchiveDiagnostic {
                key: key.clone(),
                kind,
                message,
            })
        };

        let work = async {
            let bytes = self
                .store
                .get_object(&plan.bucket, &archive.key)
                .await
                .map_err(|e| (DiagnosticKind::Download, e.to_string()))?;

            let decoder = self.decoder.clone();
            let password = plan.password.clone();
            let archive_key = archive.key.clone();
            let storage_path = format!("s3://{}/{}", plan.bucket, archive.key);

            // Decoding and matching are CPU-bound; keep them off the async
            // workers. Entries are dropped as soon as the scan returns.
            tokio::task::spawn_blocking(move || {
                let entries = decoder.extract(&bytes, password.as_deref())?;
                drop(bytes);
                Ok::<_, DecodeError>(scanner::scan(
                    &entries,
                    &matcher,
                    &filter,
                    &archive_key,
                    &storage_path,
                ))
            })
            .await
            .map_err(|e| (DiagnosticKind::Corrupt, format!("decoder task failed: {}", e)))?
            .map_err(|e| (decode_kind(&e), e.to_string()))
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(occurrences)) => ArchiveOutcome::Scanned(occurrences),
            Ok(Err((kind, message))) => skipped(kind, message),
            Err(_) => skipped(
                DiagnosticKind::Timeout,
                format!("timed out after {}s", timeout.as_secs()),
            ),
        }
    }
}

fn decode_kind(e: &DecodeError) -> DiagnosticKind {
    match e {
        DecodeError::PasswordRequired => DiagnosticKind::PasswordRequired,
        DecodeError::WrongPassword => DiagnosticKind::WrongPassword,
        DecodeError::UnsupportedEncryption(_) => DiagnosticKind::UnsupportedEncryption,
        DecodeError::Corrupt(_) => DiagnosticKind::Corrupt,
        DecodeError::Unsupported(_) => DiagnosticKind::Unsupported,
    }
}

fn listing_abort(bucket: &str, prefix: &str, e: StorageError) -> Abort {
    Abort(format!(
        "failed to list s3://{}/{}: {}",
        bucket, prefix, e
    ))
}
