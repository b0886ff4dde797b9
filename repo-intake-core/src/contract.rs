//! # contract: seams to the outside world
//!
//! The pipeline talks to two external capabilities it does not implement
//! itself: a version-control client (reachability probe and shallow clone)
//! and a notification transport (broker publish and flush). Both are
//! expressed as traits here so the coordinator receives them as injected
//! handles, and so tests can swap in `mockall` mocks.
//!
//! Production implementations live in [`crate::git`] and
//! [`crate::publisher`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Captured result of an external process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }
}

/// The process could not be run to completion at all.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {}s", .after.as_secs())]
    Timeout { program: String, after: Duration },

    #[error("{program} was stopped because the ingestion was cancelled")]
    Cancelled { program: String },
}

/// Version-control capability used by the remote ingestor.
///
/// Implementations must pass the URL as a discrete argument. When the
/// timeout fires, or `cancel` does for a clone, the underlying process must
/// be killed and reaped before the call returns, so nothing writes into
/// `dest` afterwards.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait GitClient: Send + Sync {
    /// List the remote's references without fetching history.
    async fn list_refs(&self, url: &str, timeout: Duration) -> Result<CommandOutput, CommandError>;

    /// Fetch only the most recent `depth` revisions of `url` into `dest`,
    /// which exists and is empty.
    async fn shallow_clone(
        &self,
        url: &str,
        dest: &Path,
        depth: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError>;
}

/// Errors raised by a notification transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("send buffer full ({capacity} records in flight)")]
    QueueFull { capacity: usize },

    #[error("broker rejected record for {topic}: HTTP {status}: {body}")]
    Rejected {
        topic: String,
        status: u16,
        body: String,
    },

    #[error("records not confirmed for {0:?}")]
    Undelivered(Vec<String>),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("could not encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Receipt for one record handed to an [`EventTransport`].
///
/// Only the caller that sent a record holds its ticket, so concurrent
/// publishers sharing one transport confirm their own records and nobody
/// else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTicket(pub u64);

/// Broker-side half of the event publisher.
///
/// `send` hands one record to the transport and returns its ticket; `flush`
/// blocks until every listed record has been confirmed or has failed.
/// `drain` does the same for everything still in flight, for shutdown.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<DeliveryTicket, TransportError>;

    async fn flush(&self, tickets: &[DeliveryTicket], timeout: Duration) -> Result<(), TransportError>;

    async fn drain(&self, timeout: Duration) -> Result<(), TransportError>;
}
