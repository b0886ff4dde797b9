//! Error taxonomy for the ingestion pipeline.
//!
//! Every failure surfaced by the coordinator is an [`IngestError`]. The
//! variants mirror the outcomes a caller can distinguish: bad input is
//! rejected before anything touches disk, timeouts and remote validation
//! failures short-circuit, and `IngestFailed` is only ever returned after the
//! staging directory has been rolled back.

use std::time::Duration;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::contract::CommandError;

/// Errors surfaced by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("repository name {0:?} must be alphanumeric")]
    InvalidName(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid repository URL {url}: {detail}")]
    InvalidRemote { url: String, detail: String },

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("failed to ingest {name}: {source}")]
    IngestFailed {
        name: String,
        #[source]
        source: FailureCause,
    },

    #[error("failed to publish scan event to {topics:?}: {detail}")]
    PublishFailed { topics: Vec<String>, detail: String },
}

/// The underlying reason an ingestion failed after validation passed.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("fetch exited with {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    Fetch { code: Option<i32>, stderr: String },

    #[error("could not run external command: {0}")]
    Command(#[from] CommandError),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("ingestion was cancelled")]
    Cancelled,
}

/// Plain discriminant of [`IngestError`], used for status mapping and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidName,
    InvalidRequest,
    InvalidRemote,
    Timeout,
    IngestFailed,
    PublishFailed,
}

impl ErrorKind {
    /// HTTP-equivalent status code for this kind of failure.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidName | ErrorKind::InvalidRequest | ErrorKind::InvalidRemote => 400,
            ErrorKind::Timeout => 408,
            ErrorKind::IngestFailed | ErrorKind::PublishFailed => 500,
        }
    }
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidName(_) => ErrorKind::InvalidName,
            IngestError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            IngestError::InvalidRemote { .. } => ErrorKind::InvalidRemote,
            IngestError::Timeout { .. } => ErrorKind::Timeout,
            IngestError::IngestFailed { .. } => ErrorKind::IngestFailed,
            IngestError::PublishFailed { .. } => ErrorKind::PublishFailed,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub(crate) fn failed(name: impl Into<String>, source: impl Into<FailureCause>) -> Self {
        IngestError::IngestFailed {
            name: name.into(),
            source: source.into(),
        }
    }
}
