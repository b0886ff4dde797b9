//! Translation of CLI arguments and batch manifests into ingestion requests.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use repo_intake_core::error::IngestError;
use repo_intake_core::request::{IngestionRequest, IntakeForm, UploadFile};
use serde::Deserialize;
use tracing::{error, info};

/// One ingestion as described on the command line or in a manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEntry {
    pub repo_type: String,
    pub repo_name: String,
    #[serde(default)]
    pub repo_file: Option<PathBuf>,
    #[serde(default)]
    pub repo_url: Option<String>,
}

impl RequestEntry {
    /// Open the upload (if any) and validate the form.
    pub async fn into_request(self) -> Result<IngestionRequest, IngestError> {
        let repo_file = match self.repo_file {
            Some(path) => Some(open_upload(&path).await?),
            None => None,
        };
        IngestionRequest::try_from(IntakeForm {
            repo_type: self.repo_type,
            repo_name: self.repo_name,
            repo_file,
            repo_url: self.repo_url,
        })
    }
}

async fn open_upload(path: &Path) -> Result<UploadFile, IngestError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        error!(error = ?e, path = ?path, "Failed to open upload file");
        IngestError::InvalidRequest(format!("cannot open {}: {e}", path.display()))
    })?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(UploadFile {
        filename,
        stream: Box::new(file),
    })
}

/// Reads a YAML list of [`RequestEntry`]s.
pub fn load_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<RequestEntry>> {
    let path_ref = path.as_ref();
    info!(manifest_path = ?path_ref, "Loading batch manifest");
    let content = fs::read_to_string(path_ref)
        .map_err(|e| anyhow::anyhow!("Failed to read manifest {:?}: {}", path_ref, e))?;
    let entries: Vec<RequestEntry> = serde_yaml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse manifest YAML: {e}"))?;
    info!(entries = entries.len(), "Parsed batch manifest");
    Ok(entries)
}
