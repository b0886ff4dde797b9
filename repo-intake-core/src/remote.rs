//! Ingestion of repositories referenced by a remote URL.
//!
//! The remote is probed first (`ls-remote`); only a reachable remote causes
//! the staging directory to be reset. The shallow clone then runs as a child
//! process whose completion is awaited, so the caller's executor thread is
//! never blocked.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RemoteConfig;
use crate::contract::{CommandError, GitClient};
use crate::error::{FailureCause, IngestError};
use crate::name::ArtifactName;
use crate::staging::StagingDirectory;

#[derive(Clone)]
pub struct RemoteIngestor {
    staging: StagingDirectory,
    git: Arc<dyn GitClient>,
    probe_timeout: Duration,
    fetch_timeout: Duration,
    depth: u32,
}

impl RemoteIngestor {
    pub fn new(staging: StagingDirectory, git: Arc<dyn GitClient>, config: &RemoteConfig) -> Self {
        Self {
            staging,
            git,
            probe_timeout: config.probe_timeout(),
            fetch_timeout: config.fetch_timeout(),
            depth: config.depth,
        }
    }

    pub async fn ingest(&self, name: &ArtifactName, remote_url: &str) -> Result<PathBuf, IngestError> {
        self.ingest_until(name, remote_url, &CancellationToken::new()).await
    }

    /// [`RemoteIngestor::ingest`] that gives up once `cancel` fires. The
    /// clone process is reaped and the directory rolled back before this
    /// returns.
    pub async fn ingest_until(
        &self,
        name: &ArtifactName,
        remote_url: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, IngestError> {
        tokio::select! {
            validated = self.validate_remote(name, remote_url) => validated?,
            _ = cancel.cancelled() => {
                warn!(repo_url = remote_url, "Remote validation cancelled");
                return Err(IngestError::failed(name.as_str(), FailureCause::Cancelled));
            }
        }

        let guard = self
            .staging
            .prepare(name)
            .await
            .map_err(|e| IngestError::failed(name.as_str(), e))?;

        let outcome = self
            .git
            .shallow_clone(remote_url, guard.path(), self.depth, self.fetch_timeout, cancel)
            .await;

        let failure = match outcome {
            Ok(output) if output.succeeded() => {
                info!(repo_name = %name, repo_url = remote_url, path = %guard.path().display(), "Shallow clone complete");
                return Ok(guard.commit());
            }
            Ok(output) => {
                error!(repo_name = %name, repo_url = remote_url, code = ?output.code, stderr = %output.stderr, "Shallow clone failed");
                IngestError::failed(
                    name.as_str(),
                    FailureCause::Fetch {
                        code: output.code,
                        stderr: output.stderr,
                    },
                )
            }
            Err(CommandError::Timeout { after, .. }) => {
                error!(repo_name = %name, repo_url = remote_url, timeout_secs = after.as_secs(), "Shallow clone timed out");
                IngestError::Timeout {
                    operation: "git clone",
                    after,
                }
            }
            Err(CommandError::Cancelled { .. }) => {
                warn!(repo_name = %name, repo_url = remote_url, "Shallow clone cancelled");
                IngestError::failed(name.as_str(), FailureCause::Cancelled)
            }
            Err(e) => {
                error!(repo_name = %name, repo_url = remote_url, error = ?e, "Could not run shallow clone");
                IngestError::failed(name.as_str(), e)
            }
        };
        guard.discard().await;
        Err(failure)
    }

    /// Reachability check. Never touches the filesystem.
    async fn validate_remote(&self, name: &ArtifactName, remote_url: &str) -> Result<(), IngestError> {
        match self.git.list_refs(remote_url, self.probe_timeout).await {
            Ok(output) if output.succeeded() => {
                info!(repo_url = remote_url, "Remote repository is reachable");
                Ok(())
            }
            Ok(output) => {
                warn!(repo_url = remote_url, code = ?output.code, stderr = %output.stderr, "Remote repository failed validation");
                Err(IngestError::InvalidRemote {
                    url: remote_url.to_string(),
                    detail: output.stderr,
                })
            }
            Err(CommandError::Timeout { after, .. }) => {
                warn!(repo_url = remote_url, timeout_secs = after.as_secs(), "Remote validation timed out");
                Err(IngestError::Timeout {
                    operation: "git ls-remote",
                    after,
                })
            }
            Err(e) => {
                error!(repo_url = remote_url, error = ?e, "Could not run remote validation");
                Err(IngestError::failed(name.as_str(), e))
            }
        }
    }
}
