//! Job identifiers and job records.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a job.
///
/// ## State Transitions:
/// `Queued → Processing → {Done, Error}`
///
/// `Queued` only lasts from submission until the job's task writes its first
/// processing record. `Done` and `Error` are terminal: nothing is ever written
/// for the job after one of them has been published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

/// Opaque job identifier handed to the client.
///
/// Generated ids are the 32-char hex form of a v4 UUID. Ids coming back from
/// the client go through [`JobId::parse`] so that only plain tokens ever reach
/// the store (the file backend uses the id as a file name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        JobId(Uuid::new_v4().simple().to_string())
    }

    /// Accept a client-supplied id; `None` for anything that could not have
    /// been issued by [`JobId::generate`] or a compatible token format.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        valid.then(|| JobId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The record stored for a job and returned verbatim by the status endpoint.
///
/// ```json
/// {"status": "processing", "percent": 27, "message": "A transcrever...", "filename": null}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    /// 0..=100, never decreases while the job runs, 100 once terminal
    pub percent: u8,
    pub message: String,
    /// Result document name, only set on `done` when a document was produced
    pub filename: Option<String>,
}

impl JobState {
    /// Initial record written at submission time.
    pub fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            percent: 0,
            message: "A preparar...".to_string(),
            filename: None,
        }
    }

    pub fn processing(percent: u8, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Processing,
            percent: percent.min(100),
            message: message.into(),
            filename: None,
        }
    }

    pub fn done(message: impl Into<String>, filename: Option<String>) -> Self {
        Self {
            status: JobStatus::Done,
            percent: 100,
            message: message.into(),
            filename,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            percent: 100,
            message: message.into(),
            filename: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
