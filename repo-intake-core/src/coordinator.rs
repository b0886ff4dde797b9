//! Top-level orchestration of one ingestion.
//!
//! The coordinator owns the staging root, the two ingestors and the
//! publisher. For each request it:
//!   - validates the repository name before any filesystem call
//!   - claims the name, so only one ingestion per name is in flight
//!   - dispatches to [`UploadIngestor`] or [`RemoteIngestor`] under an overall
//!     deadline
//!   - notifies downstream scanners once the artifact is staged
//!
//! Notification failures are logged and never turn a staged artifact into a
//! reported failure.
//!
//! The staging work runs in its own task that owns the name lease. A
//! deadline, an [`IngestionTask::abort`] or a dropped caller only signals
//! that task to stop; it rolls back and only then releases the name, so a
//! retry never races leftover writes.
//!
//! # Navigation
//! - Awaited form: [`IngestionCoordinator::process`]
//! - Spawned form: [`IngestionCoordinator::submit`] returning an [`IngestionTask`]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{ConcurrencyPolicy, IntakeConfig};
use crate::contract::GitClient;
use crate::error::{FailureCause, IngestError};
use crate::git::GitCli;
use crate::locks::{NameLease, NameLocks};
use crate::name::ArtifactName;
use crate::publisher::EventPublisher;
use crate::remote::RemoteIngestor;
use crate::request::IngestionRequest;
use crate::staging::StagingDirectory;
use crate::upload::UploadIngestor;

/// A successfully staged artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub name: ArtifactName,
    pub path: PathBuf,
}

pub struct IngestionCoordinator {
    staging: StagingDirectory,
    uploads: UploadIngestor,
    remote: RemoteIngestor,
    publisher: Arc<EventPublisher>,
    organization_id: String,
    ingest_timeout: Duration,
    concurrency: ConcurrencyPolicy,
    locks: Arc<NameLocks>,
}

impl IngestionCoordinator {
    /// Build a coordinator around injected collaborators.
    pub fn new(
        config: &IntakeConfig,
        git: Arc<dyn GitClient>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        let staging = StagingDirectory::new(&config.staging_root);
        Self {
            uploads: UploadIngestor::new(staging.clone(), &config.upload),
            remote: RemoteIngestor::new(staging.clone(), git, &config.remote),
            staging,
            publisher,
            organization_id: config.organization_id.clone(),
            ingest_timeout: config.ingest_timeout(),
            concurrency: config.concurrency,
            locks: Arc::new(NameLocks::new()),
        }
    }

    /// Wire the production git binary and broker connection.
    pub async fn from_config(config: &IntakeConfig) -> Self {
        config.trace_loaded();
        let git = Arc::new(GitCli::new(&config.remote.git_binary));
        let publisher = Arc::new(EventPublisher::connect(&config.publisher).await);
        Self::new(config, git, publisher)
    }

    pub fn staging(&self) -> &StagingDirectory {
        &self.staging
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// Run one ingestion to completion.
    pub async fn process(&self, request: IngestionRequest) -> Result<Ingested, IngestError> {
        self.process_until(request, CancellationToken::new()).await
    }

    /// Spawn the ingestion on the runtime and return a handle to it.
    pub fn submit(self: &Arc<Self>, request: IngestionRequest) -> IngestionTask {
        let name = request.name().to_string();
        let cancel = CancellationToken::new();
        let coordinator = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { coordinator.process_until(request, token).await });
        IngestionTask { name, handle, cancel }
    }

    async fn process_until(
        &self,
        request: IngestionRequest,
        cancel: CancellationToken,
    ) -> Result<Ingested, IngestError> {
        let name = ArtifactName::parse(request.name())?;
        let span = info_span!(
            "ingestion",
            ingestion_id = %Uuid::new_v4(),
            repo_name = %name,
            kind = request.kind()
        );
        self.process_named(name, request, cancel).instrument(span).await
    }

    async fn process_named(
        &self,
        name: ArtifactName,
        request: IngestionRequest,
        cancel: CancellationToken,
    ) -> Result<Ingested, IngestError> {
        let lease = tokio::select! {
            lease = self.claim(&name) => lease?,
            _ = cancel.cancelled() => {
                info!("Ingestion cancelled while waiting for the name");
                return Err(IngestError::failed(name.as_str(), FailureCause::Cancelled));
            }
        };
        info!("Ingestion started");

        let staged = self.stage(name.clone(), request, lease, cancel).await?;
        info!(path = %staged.display(), "Repository staged");

        match self.publisher.publish_ready(&name, &self.organization_id).await {
            Ok(report) if report.skipped => debug!("Scan notification skipped"),
            Ok(report) => debug!(topics = ?report.delivered, "Scan notification delivered"),
            Err(e) => warn!(error = %e, "Scan notification failed; ingestion still succeeded"),
        }

        Ok(Ingested { name, path: staged })
    }

    async fn claim(&self, name: &ArtifactName) -> Result<NameLease, IngestError> {
        match self.concurrency {
            ConcurrencyPolicy::Wait => Ok(self.locks.acquire(name).await),
            ConcurrencyPolicy::Reject => self.locks.try_acquire(name).ok_or_else(|| {
                warn!("Rejected: an ingestion for this name is already in flight");
                IngestError::InvalidRequest(format!("an ingestion for {name} is already in progress"))
            }),
        }
    }

    /// Stage the artifact in a task that holds `lease` until its rollback,
    /// if any, has finished.
    async fn stage(
        &self,
        name: ArtifactName,
        request: IngestionRequest,
        lease: NameLease,
        cancel: CancellationToken,
    ) -> Result<PathBuf, IngestError> {
        let label = name.to_string();
        let stop = cancel.child_token();
        let uploads = self.uploads.clone();
        let remote = self.remote.clone();
        let token = stop.clone();
        let mut work = tokio::spawn(
            async move {
                let outcome = dispatch(&uploads, &remote, &name, request, &token).await;
                debug!(repo_name = lease.name(), "Releasing name");
                drop(lease);
                outcome
            }
            .in_current_span(),
        );
        // a caller that stops waiting still stops the work
        let _abandoned = stop.clone().drop_guard();

        let mut timed_out = false;
        let joined = tokio::select! {
            joined = &mut work => joined,
            _ = tokio::time::sleep(self.ingest_timeout) => {
                warn!(timeout_secs = self.ingest_timeout.as_secs(), "Ingestion deadline reached, stopping");
                timed_out = true;
                stop.cancel();
                (&mut work).await
            }
        };

        match joined {
            Ok(Err(_)) if timed_out => Err(IngestError::Timeout {
                operation: "ingestion",
                after: self.ingest_timeout,
            }),
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Staging task failed");
                Err(IngestError::failed(label, FailureCause::Task(e.to_string())))
            }
        }
    }
}

async fn dispatch(
    uploads: &UploadIngestor,
    remote: &RemoteIngestor,
    name: &ArtifactName,
    request: IngestionRequest,
    cancel: &CancellationToken,
) -> Result<PathBuf, IngestError> {
    // nothing has been reset yet, so the previous artifact stays untouched
    if cancel.is_cancelled() {
        return Err(IngestError::failed(name.as_str(), FailureCause::Cancelled));
    }
    match request {
        IngestionRequest::Upload {
            stream,
            declared_filename,
            ..
        } => uploads.ingest_until(name, stream, &declared_filename, cancel).await,
        IngestionRequest::Clone { remote_url, .. } => remote.ingest_until(name, &remote_url, cancel).await,
    }
}

/// Handle to an ingestion running in the background.
///
/// Aborting asks the ingestion to stop; [`IngestionTask::join`] returns once
/// its staging directory has been rolled back.
#[derive(Debug)]
pub struct IngestionTask {
    name: String,
    handle: JoinHandle<Result<Ingested, IngestError>>,
    cancel: CancellationToken,
}

impl IngestionTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Wait for the ingestion outcome.
    pub async fn join(self) -> Result<Ingested, IngestError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(IngestError::failed(self.name, FailureCause::Task(e.to_string()))),
        }
    }
}
