//! In-memory job registry and the polling contract.
//!
//! [`JobRegistry::submit`] validates a [`SearchRequest`], stores a new job in
//! `pending` state and spawns the [`Orchestrator`] on the tokio runtime,
//! returning the job id straight away. [`JobRegistry::status`] clones the
//! job's current state under that job's own mutex and never waits for the
//! orchestrator.
//!
//! # Locking
//!
//! ```text
//! JobRegistry ── RwLock<HashMap<JobId, Arc<JobHandle>>>   (id allocation, lookup)
//!                                     │
//!                                     └─ JobHandle ── Mutex<JobState>   (one per job)
//! ```
//!
//! No lock spans more than one job. Jobs live until the process exits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::archive::{ArchiveDecoder, ZipDecoder};
use crate::config::Config;
use crate::error::ValidationError;
use crate::identifiers::{self, IdentifierFormat};
use crate::models::{
    ArchiveDiagnostic, JobId, JobSnapshot, JobStatus, JobSummary, Occurrence, ResultSet,
    SearchRequest,
};
use crate::orchestrator::{Orchestrator, SearchPlan};
use crate::report;
use crate::storage::StoreProvider;

/// Mutable per-job record. Written only by the job's orchestrator.
#[derive(Debug)]
pub struct JobState {
    status: JobStatus,
    progress: u8,
    results: ResultSet,
    error: Option<String>,
    message: Option<String>,
    diagnostics: Vec<ArchiveDiagnostic>,
    folders_total: usize,
    archives_scanned: usize,
    archives_skipped: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobState {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::Pending,
            progress: 0,
            results: ResultSet::new(),
            error: None,
            message: None,
            diagnostics: Vec::new(),
            folders_total: 0,
            archives_scanned: 0,
            archives_skipped: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    /// Raise progress; never lowers it and never reaches 100 before
    /// completion.
    pub fn advance(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(99));
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn set_folders_total(&mut self, total: usize) {
        self.folders_total = total;
    }

    pub fn merge(&mut self, occurrences: Vec<Occurrence>) {
        self.results.merge(occurrences);
        self.archives_scanned += 1;
    }

    pub fn record_skip(&mut self, diagnostic: ArchiveDiagnostic) {
        self.diagnostics.push(diagnostic);
        self.archives_skipped += 1;
    }

    fn start(&mut self) {
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.results = ResultSet::new();
    }

    fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.progress = 100;
    }

    fn fail(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
    }

    fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
    }
}

/// Shared handle to one job: its state plus the cancellation flag.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    state: Mutex<JobState>,
    cancel_requested: AtomicBool,
}

impl JobHandle {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            state: Mutex::new(JobState::new()),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Apply `f` to the state unless the job already reached a terminal
    /// status. Returns whether `f` ran.
    pub fn update(&self, f: impl FnOnce(&mut JobState)) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.status.is_terminal() {
            return false;
        }
        f(&mut *state);
        state.updated_at = Utc::now();
        true
    }

    /// Point-in-time copy of the job.
    pub fn snapshot(&self) -> JobSnapshot {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        JobSnapshot {
            job_id: self.id,
            status: state.status,
            progress: state.progress,
            results: state.results.results().to_vec(),
            error: state.error.clone(),
            message: state.message.clone(),
            diagnostics: state.diagnostics.clone(),
            folders_total: state.folders_total,
            archives_scanned: state.archives_scanned,
            archives_skipped: state.archives_skipped,
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }

    fn summary(&self) -> JobSummary {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        JobSummary {
            job_id: self.id,
            status: state.status,
            progress: state.progress,
            identifiers_found: state.results.len(),
            created_at: state.created_at,
        }
    }

    /// CSV export of whatever has been found so far.
    pub fn report_csv(&self) -> anyhow::Result<String> {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        report::to_csv(state.results.results())
    }

    pub fn status(&self) -> JobStatus {
        match self.state.lock() {
            Ok(guard) => guard.status,
            Err(poisoned) => poisoned.into_inner().status,
        }
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn start(&self) -> bool {
        self.update(JobState::start)
    }

    pub fn complete(&self) -> bool {
        self.update(JobState::complete)
    }

    pub fn fail(&self, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update(move |s| s.fail(error))
    }

    pub fn cancel(&self) -> bool {
        self.update(|s| {
            s.cancel();
            s.set_message("Search stopped by user");
        })
    }
}

/// Check a submission and parse its identifiers.
pub fn validate(request: &SearchRequest) -> Result<Vec<String>, ValidationError> {
    if request.credentials.access_key.trim().is_empty() {
        return Err(ValidationError::MissingAccessKey);
    }
    if request.credentials.secret_key.trim().is_empty() {
        return Err(ValidationError::MissingSecretKey);
    }
    if request.bucket.trim().is_empty() {
        return Err(ValidationError::MissingBucket);
    }
    if request.identifiers.trim().is_empty() {
        return Err(ValidationError::MissingIdentifiers);
    }
    let ids = identifiers::load(&request.identifiers, request.format);
    if ids.is_empty() {
        let format = match request.format {
            IdentifierFormat::Line => "line",
            IdentifierFormat::Csv => "csv",
        };
        return Err(ValidationError::NoIdentifiers(format));
    }
    Ok(ids)
}

/// Owns every job for the lifetime of the process.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
    config: Arc<Config>,
    provider: Arc<dyn StoreProvider>,
    decoder: Arc<dyn ArchiveDecoder>,
}

impl JobRegistry {
    /// Registry using the ZIP decoder configured from `[search]`.
    pub fn new(config: Arc<Config>, provider: Arc<dyn StoreProvider>) -> Self {
        let decoder = ZipDecoder::new(config.search.max_entry_bytes)
            .max_archive_bytes(config.search.max_archive_bytes)
            .only_suffixes(&config.search.text_extensions);
        Self::with_decoder(config, provider, Arc::new(decoder))
    }

    pub fn with_decoder(
        config: Arc<Config>,
        provider: Arc<dyn StoreProvider>,
        decoder: Arc<dyn ArchiveDecoder>,
    ) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            config,
            provider,
            decoder,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn StoreProvider> {
        &self.provider
    }

    /// Validate, register and start a job. Must be called from within a
    /// tokio runtime.
    pub fn submit(&self, request: SearchRequest) -> Result<JobId, ValidationError> {
        let identifiers = validate(&request)?;
        let id = Uuid::new_v4();
        let job = Arc::new(JobHandle::new(id));
        {
            let mut jobs = match self.jobs.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            jobs.insert(id, job.clone());
        }

        tracing::info!(
            job_id = %id,
            bucket = %request.bucket,
            prefix = %request.prefix,
            identifiers = identifiers.len(),
            "job submitted"
        );

        let plan = SearchPlan {
            bucket: request.bucket.trim().to_string(),
            prefix: request.prefix.trim().to_string(),
            password: request.password.clone().filter(|p| !p.is_empty()),
            identifiers,
        };
        let provider = self.provider.clone();
        let decoder = self.decoder.clone();
        let settings = self.config.search.clone();
        let credentials = request.credentials;

        let worker_job = job.clone();
        let run = tokio::spawn(async move {
            let store = match provider.connect(&credentials) {
                Ok(store) => store,
                Err(e) => {
                    worker_job.fail(format!("failed to connect to storage: {}", e));
                    return;
                }
            };
            Orchestrator::new(store, decoder, settings)
                .run(&worker_job, plan)
                .await;
        });

        // A panicking orchestrator must not leave the job stuck in
        // `processing`.
        tokio::spawn(async move {
            if let Err(e) = run.await {
                tracing::error!(job_id = %job.id(), error = %e, "search task aborted");
                job.fail(format!("internal error: {}", e));
            }
        });

        Ok(id)
    }

    fn get(&self, id: &JobId) -> Option<Arc<JobHandle>> {
        let jobs = match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        jobs.get(id).cloned()
    }

    /// Current state of a job; `None` when the id is unknown.
    pub fn status(&self, id: &JobId) -> Option<JobSnapshot> {
        self.get(id).map(|job| job.snapshot())
    }

    /// Ask a job to stop. `Some(false)` when it already finished.
    pub fn cancel(&self, id: &JobId) -> Option<bool> {
        let job = self.get(id)?;
        if job.status().is_terminal() {
            return Some(false);
        }
        job.request_cancel();
        tracing::info!(job_id = %id, "cancellation requested");
        Some(true)
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<JobSummary> {
        let handles: Vec<Arc<JobHandle>> = {
            let jobs = match self.jobs.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            jobs.values().cloned().collect()
        };
        let mut summaries: Vec<JobSummary> = handles.iter().map(|j| j.summary()).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// CSV report of a job's current results; `None` when the id is unknown.
    pub fn report_csv(&self, id: &JobId) -> Option<anyhow::Result<String>> {
        self.get(id).map(|job| job.report_csv())
    }
}
