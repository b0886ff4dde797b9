//! Inbound request shapes and the result handed back to callers.

use std::fmt;

use serde::Serialize;
use tokio::io::AsyncRead;

use crate::coordinator::Ingested;
use crate::error::IngestError;

/// Byte source of an upload. Consumed by the ingestion.
pub type UploadStream = Box<dyn AsyncRead + Send + Unpin>;

/// One ingestion request; exactly one source per request.
pub enum IngestionRequest {
    Upload {
        name: String,
        stream: UploadStream,
        declared_filename: String,
    },
    Clone {
        name: String,
        remote_url: String,
    },
}

impl IngestionRequest {
    pub fn name(&self) -> &str {
        match self {
            IngestionRequest::Upload { name, .. } | IngestionRequest::Clone { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IngestionRequest::Upload { .. } => "upload",
            IngestionRequest::Clone { .. } => "url",
        }
    }
}

impl fmt::Debug for IngestionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestionRequest::Upload {
                name,
                declared_filename,
                ..
            } => f
                .debug_struct("Upload")
                .field("name", name)
                .field("declared_filename", declared_filename)
                .finish_non_exhaustive(),
            IngestionRequest::Clone { name, remote_url } => f
                .debug_struct("Clone")
                .field("name", name)
                .field("remote_url", remote_url)
                .finish(),
        }
    }
}

/// An uploaded file as delivered by the request-handling layer.
pub struct UploadFile {
    pub filename: String,
    pub stream: UploadStream,
}

/// Raw form fields: `{repo_type, repo_name, repo_file?, repo_url?}`.
pub struct IntakeForm {
    pub repo_type: String,
    pub repo_name: String,
    pub repo_file: Option<UploadFile>,
    pub repo_url: Option<String>,
}

impl TryFrom<IntakeForm> for IngestionRequest {
    type Error = IngestError;

    fn try_from(form: IntakeForm) -> Result<Self, Self::Error> {
        let url = form.repo_url.filter(|u| !u.trim().is_empty());
        match form.repo_type.as_str() {
            "upload" => {
                if url.is_some() {
                    return Err(IngestError::InvalidRequest(
                        "upload requests must not carry a repository URL".into(),
                    ));
                }
                let file = form
                    .repo_file
                    .ok_or_else(|| IngestError::InvalidRequest("no file provided".into()))?;
                Ok(IngestionRequest::Upload {
                    name: form.repo_name,
                    stream: file.stream,
                    declared_filename: file.filename,
                })
            }
            "url" => {
                if form.repo_file.is_some() {
                    return Err(IngestError::InvalidRequest(
                        "URL requests must not carry a file".into(),
                    ));
                }
                let remote_url = url
                    .ok_or_else(|| IngestError::InvalidRequest("repository URL is required".into()))?;
                Ok(IngestionRequest::Clone {
                    name: form.repo_name,
                    remote_url,
                })
            }
            other => Err(IngestError::InvalidRequest(format!(
                "invalid repository type {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Result surfaced to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct IntakeResponse {
    pub status: ResponseStatus,
    pub message: String,
    #[serde(skip)]
    code: u16,
}

impl IntakeResponse {
    pub fn status_code(&self) -> u16 {
        self.code
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

impl From<&Result<Ingested, IngestError>> for IntakeResponse {
    fn from(result: &Result<Ingested, IngestError>) -> Self {
        match result {
            Ok(ingested) => IntakeResponse {
                status: ResponseStatus::Success,
                message: format!("Repository {} staged at {}", ingested.name, ingested.path.display()),
                code: 200,
            },
            Err(e) => IntakeResponse {
                status: ResponseStatus::Error,
                message: e.to_string(),
                code: e.status_code(),
            },
        }
    }
}
