//! HTTP boundary.
//!
//! Thin JSON layer over the [`JobRegistry`] plus a few storage pass-through
//! endpoints used by the web UI. Search jobs run in the background; clients
//! submit once and poll `GET /jobs/{id}` until the status is terminal.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/jobs` | Submit a search, `202 {"job_id": ...}` |
//! | `GET`  | `/jobs` | List jobs, newest first |
//! | `GET`  | `/jobs/{id}` | Job snapshot: status, progress, results, diagnostics |
//! | `POST` | `/jobs/{id}/cancel` | Request cancellation |
//! | `GET`  | `/jobs/{id}/report.csv` | CSV export of the current results |
//! | `POST` | `/buckets` | List buckets for the supplied credentials |
//! | `POST` | `/objects/download` | Raw object bytes as an attachment |
//! | `POST` | `/objects/presign` | Pre-signed GET URL |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "bucket name is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `storage_error` (502),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser UI can be
//! served from a different origin.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::{StorageError, ValidationError};
use crate::jobs::JobRegistry;
use crate::models::{Credentials, JobId, JobSnapshot, JobSummary, SearchRequest};
use crate::storage::s3::{S3Provider, MAX_PRESIGN_EXPIRY_SECS};
use crate::storage::{file_name, ObjectStore};

/// Default lifetime of a pre-signed URL.
const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 3600;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<JobRegistry>,
}

/// Starts the HTTP server against real S3.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let provider = S3Provider::new(config.storage.clone())?;
    let registry = Arc::new(JobRegistry::new(
        Arc::new(config.clone()),
        Arc::new(provider),
    ));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("zipsweep listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    axum::serve(listener, router(registry)).await?;
    Ok(())
}

/// Build the application router. Exposed so tests and embedders can serve
/// it with their own listener and store provider.
pub fn router(registry: Arc<JobRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/jobs", post(handle_submit).get(handle_list_jobs))
        .route("/jobs/{id}", get(handle_job_status))
        .route("/jobs/{id}/cancel", post(handle_cancel))
        .route("/jobs/{id}/report.csv", get(handle_report))
        .route("/buckets", post(handle_buckets))
        .route("/objects/download", post(handle_download))
        .route("/objects/presign", post(handle_presign))
        .layer(cors)
        .with_state(AppState { registry })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        bad_request(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        bad_request(e.body_text())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } | StorageError::NoSuchBucket(_) => {
                not_found(e.to_string())
            }
            StorageError::InvalidRequest(_) => bad_request(e.to_string()),
            _ => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "storage_error",
                message: e.to_string(),
            },
        }
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse::<JobId>()
        .map_err(|_| not_found(format!("no job with id: {}", raw)))
}

fn unknown_job(id: &JobId) -> AppError {
    not_found(format!("no job with id: {}", id))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Jobs ============

#[derive(Serialize)]
struct SubmitResponse {
    job_id: JobId,
}

/// Handler for `POST /jobs`.
///
/// Validation happens synchronously; on success the job is already running
/// when the `202` is returned.
async fn handle_submit(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let Json(request) = body?;
    let job_id = state.registry.submit(request)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<JobSummary>,
}

async fn handle_list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.registry.list(),
    })
}

async fn handle_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    let id = parse_job_id(&id)?;
    state
        .registry
        .status(&id)
        .map(Json)
        .ok_or_else(|| unknown_job(&id))
}

#[derive(Serialize)]
struct CancelResponse {
    job_id: JobId,
    /// `false` when the job had already finished.
    cancelled: bool,
}

async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let id = parse_job_id(&id)?;
    let cancelled = state.registry.cancel(&id).ok_or_else(|| unknown_job(&id))?;
    Ok(Json(CancelResponse {
        job_id: id,
        cancelled,
    }))
}

async fn handle_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_job_id(&id)?;
    let csv = state
        .registry
        .report_csv(&id)
        .ok_or_else(|| unknown_job(&id))?
        .map_err(|e| internal(format!("failed to render report: {:#}", e)))?;
    let disposition = format!("attachment; filename=\"zipsweep-{}.csv\"", id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

// ============ Storage pass-through ============

#[derive(Deserialize)]
struct BucketsRequest {
    #[serde(default)]
    credentials: Credentials,
}

#[derive(Serialize)]
struct BucketsResponse {
    buckets: Vec<String>,
}

#[derive(Deserialize)]
struct ObjectRequest {
    #[serde(default)]
    credentials: Credentials,
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    key: String,
    /// Only used by `/objects/presign`.
    #[serde(default)]
    expiry_secs: Option<u64>,
}

#[derive(Serialize)]
struct PresignResponse {
    url: String,
    expiry_secs: u64,
}

fn connect(state: &AppState, credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, AppError> {
    if credentials.access_key.trim().is_empty() {
        return Err(ValidationError::MissingAccessKey.into());
    }
    if credentials.secret_key.trim().is_empty() {
        return Err(ValidationError::MissingSecretKey.into());
    }
    Ok(state.registry.provider().connect(credentials)?)
}

fn require_object(request: &ObjectRequest) -> Result<(), AppError> {
    if request.bucket.trim().is_empty() {
        return Err(ValidationError::MissingBucket.into());
    }
    if request.key.trim().is_empty() {
        return Err(bad_request("object key is required"));
    }
    Ok(())
}

async fn handle_buckets(
    State(state): State<AppState>,
    body: Result<Json<BucketsRequest>, JsonRejection>,
) -> Result<Json<BucketsResponse>, AppError> {
    let Json(request) = body?;
    let store = connect(&state, &request.credentials)?;
    let buckets = store.list_buckets().await?;
    Ok(Json(BucketsResponse { buckets }))
}

/// Attachment file name for `key`: its last path segment without quotes or
/// control characters, which cannot appear in a header value.
fn attachment_name(key: &str) -> String {
    file_name(key)
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect()
}

/// Handler for `POST /objects/download`.
///
/// The object is streamed back chunk by chunk as it arrives from storage.
/// A missing key is detected before any bytes are sent and returns 404.
async fn handle_download(
    State(state): State<AppState>,
    body: Result<Json<ObjectRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body?;
    require_object(&request)?;
    let store = connect(&state, &request.credentials)?;
    let stream = store
        .get_object_stream(&request.bucket, &request.key)
        .await?;

    let disposition = format!("attachment; filename=\"{}\"", attachment_name(&request.key));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn handle_presign(
    State(state): State<AppState>,
    body: Result<Json<ObjectRequest>, JsonRejection>,
) -> Result<Json<PresignResponse>, AppError> {
    let Json(request) = body?;
    require_object(&request)?;
    let expiry_secs = request.expiry_secs.unwrap_or(DEFAULT_PRESIGN_EXPIRY_SECS);
    if expiry_secs == 0 || expiry_secs > MAX_PRESIGN_EXPIRY_SECS {
        return Err(bad_request(format!(
            "expiry_secs must be between 1 and {}",
            MAX_PRESIGN_EXPIRY_SECS
        )));
    }
    let store = connect(&state, &request.credentials)?;
    let url = store.presign_get(&request.bucket, &request.key, expiry_secs)?;
    Ok(Json(PresignResponse { url, expiry_secs }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_status_codes() {
        let e: AppError = StorageError::NoSuchBucket("acme".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.code, "not_found");

        let e: AppError = StorageError::Status {
            operation: "GetObject",
            status: 403,
            body: "denied".into(),
        }
        .into();
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
        assert_eq!(e.code, "storage_error");
    }

    #[test]
    fn attachment_name_drops_header_breaking_characters() {
        assert_eq!(attachment_name("exports/2024/a.zip"), "a.zip");
        assert_eq!(attachment_name("dir/evil\r\nSet-Cookie: x.zip"), "evilSet-Cookie: x.zip");
        assert_eq!(attachment_name("dir/\"quoted\"\t.zip"), "quoted.zip");
        assert!(header::HeaderValue::from_str(&format!(
            "attachment; filename=\"{}\"",
            attachment_name("a/b\u{7f}\0c.zip")
        ))
        .is_ok());
    }

    #[test]
    fn malformed_job_id_is_not_found() {
        let e = parse_job_id("not-a-uuid").unwrap_err();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
    }
}
