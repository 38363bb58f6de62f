//! Error taxonomy for the search pipeline.
//!
//! Library seams return these typed errors so callers can tell a rejected
//! submission from a storage outage from an archive that will not open.
//! Application plumbing (config, CLI, server start-up) uses `anyhow`.

use thiserror::Error;

/// Submission rejected before a job is created.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("access key is required")]
    MissingAccessKey,
    #[error("secret key is required")]
    MissingSecretKey,
    #[error("bucket name is required")]
    MissingBucket,
    #[error("identifiers are required")]
    MissingIdentifiers,
    #[error("no identifiers found in the supplied {0} text")]
    NoIdentifiers(&'static str),
}

/// Failure talking to the object store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request to {operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    #[error("{operation} failed (HTTP {status}): {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("bucket not found: {0}")]
    NoSuchBucket(String),
    #[error("malformed {operation} response: {message}")]
    Malformed {
        operation: &'static str,
        message: String,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Why an archive could not be decoded.
///
/// Wrong password and unsupported encryption are deliberately separate so a
/// user is not told to re-check a password that was never the problem.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("archive is encrypted and no password was supplied")]
    PasswordRequired,
    #[error("incorrect password")]
    WrongPassword,
    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("unsupported archive: {0}")]
    Unsupported(String),
}
