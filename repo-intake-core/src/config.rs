use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Top-level configuration for the ingestion pipeline.
///
/// Every field has a default, so an empty YAML document is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Fixed root under which one directory per repository name is staged.
    pub staging_root: PathBuf,
    /// Organization stamped on every scan event.
    pub organization_id: String,
    /// Upper bound for one whole ingestion (copy or clone, plus extraction).
    pub ingest_timeout_secs: u64,
    pub concurrency: ConcurrencyPolicy,
    pub upload: UploadConfig,
    pub remote: RemoteConfig,
    pub publisher: PublisherConfig,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("/data/repos"),
            organization_id: "default".to_string(),
            ingest_timeout_secs: 900,
            concurrency: ConcurrencyPolicy::default(),
            upload: UploadConfig::default(),
            remote: RemoteConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl IntakeConfig {
    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest_timeout_secs)
    }

    pub fn trace_loaded(&self) {
        info!(
            staging_root = %self.staging_root.display(),
            organization_id = %self.organization_id,
            concurrency = ?self.concurrency,
            publisher_enabled = self.publisher.endpoint.is_some(),
            topics = ?self.publisher.topics,
            "Loaded IntakeConfig"
        );
        debug!(?self, "IntakeConfig loaded (full debug)");
    }
}

/// What to do when a request arrives for a name that is already being ingested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Queue behind the in-flight ingestion.
    #[default]
    Wait,
    /// Fail immediately with `InvalidRequest`.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub max_bytes: u64,
    /// Bound on a single chunk read from the inbound stream.
    pub read_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            max_bytes: 500 * 1024 * 1024,
            read_timeout_secs: 60,
        }
    }
}

impl UploadConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub git_binary: PathBuf,
    /// Bound on `git ls-remote`.
    pub probe_timeout_secs: u64,
    /// Bound on the shallow clone.
    pub fetch_timeout_secs: u64,
    pub depth: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            git_binary: PathBuf::from("git"),
            probe_timeout_secs: 30,
            fetch_timeout_secs: 300,
            depth: 1,
        }
    }
}

impl RemoteConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Base URL of the broker REST proxy. `None` disables notifications.
    pub endpoint: Option<String>,
    pub topics: Vec<String>,
    pub send_timeout_secs: u64,
    pub flush_timeout_secs: u64,
    pub max_in_flight: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            topics: vec!["static-analysis".to_string(), "secrets".to_string()],
            send_timeout_secs: 10,
            flush_timeout_secs: 30,
            max_in_flight: 1000,
        }
    }
}

impl PublisherConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: IntakeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.staging_root, PathBuf::from("/data/repos"));
        assert_eq!(config.upload.chunk_size, 1024 * 1024);
        assert_eq!(config.upload.max_bytes, 500 * 1024 * 1024);
        assert_eq!(config.remote.probe_timeout(), Duration::from_secs(30));
        assert_eq!(config.remote.depth, 1);
        assert_eq!(config.publisher.topics, vec!["static-analysis", "secrets"]);
        assert!(config.publisher.endpoint.is_none());
        assert_eq!(config.concurrency, ConcurrencyPolicy::Wait);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: IntakeConfig = serde_json::from_str(
            r#"{"concurrency":"reject","remote":{"fetch_timeout_secs":5},"publisher":{"endpoint":"http://broker:8082"}}"#,
        )
        .unwrap();
        assert_eq!(config.concurrency, ConcurrencyPolicy::Reject);
        assert_eq!(config.remote.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.remote.probe_timeout_secs, 30);
        assert_eq!(config.publisher.endpoint.as_deref(), Some("http://broker:8082"));
        assert_eq!(config.publisher.topics.len(), 2);
    }
}
