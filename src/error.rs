//! Error taxonomy for the striping engine
//!
//! `BackendError` is what a single adapter call can report. `StripeError` is
//! what the orchestrators surface to callers, and it maps onto HTTP status
//! codes through `ResponseError`.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Outcome of a failed adapter call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// The key is absent. An expected outcome, not a fault.
    #[error("key not found: {0}")]
    NotFound(String),
    /// Worth retrying: throttling, timeouts, dropped connections
    #[error("transient backend failure: {0}")]
    Transient(String),
    #[error("backend failure: {0}")]
    Permanent(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

impl From<io::Error> for BackendError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => BackendError::NotFound(e.to_string()),
            io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => BackendError::Transient(e.to_string()),
            _ => BackendError::Permanent(e.to_string()),
        }
    }
}

/// A single chunk that an orchestrator could not write, read or delete
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkFailure {
    pub index: u64,
    pub backend_id: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum StripeError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("upload of {file_id} failed: {} chunk(s) could not be written", .failures.len())]
    UploadFailed {
        file_id: String,
        failures: Vec<ChunkFailure>,
    },

    #[error("chunk {index} of {file_id} is unavailable on backend {backend_id}: {reason}")]
    ChunkUnavailable {
        file_id: String,
        index: u64,
        backend_id: String,
        reason: String,
    },

    #[error("delete of {file_id} left {} chunk(s) behind", .failures.len())]
    PartialDeleteFailure {
        file_id: String,
        failures: Vec<ChunkFailure>,
    },

    #[error("manifest for {file_id} is corrupt: {reason}")]
    ManifestCorruption { file_id: String, reason: String },

    #[error("manifest for {0} already exists")]
    ManifestConflict(String),

    #[error("metadata store error: {0}")]
    Metadata(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to read upload source: {0}")]
    Source(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for StripeError {
    fn from(e: rusqlite::Error) -> Self {
        StripeError::Metadata(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failures: Option<&'a [ChunkFailure]>,
}

impl ResponseError for StripeError {
    fn status_code(&self) -> StatusCode {
        match self {
            StripeError::FileNotFound(_) => StatusCode::NOT_FOUND,
            StripeError::UploadFailed { .. }
            | StripeError::ChunkUnavailable { .. }
            | StripeError::Backend(_) => StatusCode::BAD_GATEWAY,
            StripeError::PartialDeleteFailure { .. } => StatusCode::MULTI_STATUS,
            StripeError::ManifestConflict(_) => StatusCode::CONFLICT,
            StripeError::Source(_) | StripeError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            StripeError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
            StripeError::ManifestCorruption { .. } | StripeError::Metadata(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let failures = match self {
            StripeError::UploadFailed { failures, .. }
            | StripeError::PartialDeleteFailure { failures, .. } => Some(failures.as_slice()),
            _ => None,
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
            failures,
        })
    }
}
