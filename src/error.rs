//! # Error Handling
//!
//! Errors that reach the HTTP layer and how they are turned into responses.
//!
//! ## Error classes in this service:
//! - **Submission errors** (`BadRequest`, `PayloadTooLarge`): the upload request
//!   itself was wrong; reported synchronously and no job is created.
//! - **Lookup errors** (`NotFound`): a job id or result file has no record.
//! - **Store/IO errors** (`Internal`): a job record could not be read, or the
//!   server failed while accepting an upload.
//!
//! Pipeline failures never show up here. They happen after the submitting
//! request has returned and are recorded on the job itself
//! (see `jobs::tracker`).

use actix_multipart::MultipartError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::jobs::store::StoreError;

#[derive(Debug)]
pub enum AppError {
    /// Server-side failure (store unreadable, disk full, ...)
    Internal(String),

    /// Client sent a malformed or incomplete request
    BadRequest(String),

    /// Upload exceeded `server.max_upload_mb`
    PayloadTooLarge(String),

    /// Requested job or file does not exist
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

/// Every error is rendered with the same JSON shape:
///
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "Job não encontrado",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::PayloadTooLarge(msg) => ("payload_too_large", msg),
            AppError::NotFound(msg) => ("not_found", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// A record that exists but cannot be read is a server problem, not a 404.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(format!("Erro a ler estado: {}", err))
    }
}

/// Multipart parse failures are almost always caused by the client.
impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid multipart upload: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;
