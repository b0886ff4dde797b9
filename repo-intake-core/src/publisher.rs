//! Fan-out of "artifact ready" notifications to downstream scanners.
//!
//! One [`ScanEvent`] is built per staged artifact and the same serialized
//! bytes are handed to every configured topic. Topics are attempted
//! independently; a failure on one never skips the others. After all sends
//! the publisher flushes the records it sent, by ticket, so delivery is
//! confirmed before returning even while other ingestions share the
//! transport.
//!
//! When no broker is reachable at startup the publisher runs disabled: every
//! publish is logged and reported as skipped, and ingestion carries on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PublisherConfig;
use crate::contract::{DeliveryTicket, EventTransport, TransportError};
use crate::error::IngestError;
use crate::name::ArtifactName;

/// Notification that a repository has been staged and is ready to scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub repo_name: String,
    pub org_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ScanEvent {
    pub fn new(artifact: &ArtifactName, organization_id: &str) -> Self {
        Self {
            repo_name: artifact.to_string(),
            org_id: organization_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub event: ScanEvent,
    pub delivered: Vec<String>,
    /// True when the publisher is disabled and nothing was attempted.
    pub skipped: bool,
}

pub struct EventPublisher {
    transport: Option<Arc<dyn EventTransport>>,
    topics: Vec<String>,
    send_timeout: Duration,
    flush_timeout: Duration,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn EventTransport>, config: &PublisherConfig) -> Self {
        Self {
            transport: Some(transport),
            topics: config.topics.clone(),
            send_timeout: config.send_timeout(),
            flush_timeout: config.flush_timeout(),
        }
    }

    /// A publisher that logs and skips every notification.
    pub fn disabled(config: &PublisherConfig) -> Self {
        Self {
            transport: None,
            topics: config.topics.clone(),
            send_timeout: config.send_timeout(),
            flush_timeout: config.flush_timeout(),
        }
    }

    /// Connect the production transport, degrading to [`EventPublisher::disabled`]
    /// when no endpoint is configured or the broker cannot be reached.
    pub async fn connect(config: &PublisherConfig) -> Self {
        let Some(endpoint) = config.endpoint.as_deref() else {
            warn!("No broker endpoint configured, scan notifications disabled");
            return Self::disabled(config);
        };
        match RestProxyTransport::connect(endpoint, config).await {
            Ok(transport) => {
                info!(endpoint, topics = ?config.topics, "Connected scan event publisher");
                Self::new(Arc::new(transport), config)
            }
            Err(e) => {
                error!(endpoint, error = %e, "Broker unreachable, scan notifications disabled");
                Self::disabled(config)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Publish one event for `artifact` to every topic, then flush.
    pub async fn publish_ready(
        &self,
        artifact: &ArtifactName,
        organization_id: &str,
    ) -> Result<PublishReport, IngestError> {
        let event = ScanEvent::new(artifact, organization_id);
        let Some(transport) = &self.transport else {
            warn!(repo_name = %artifact, "Publisher disabled, skipping scan notification");
            return Ok(PublishReport {
                event,
                delivered: Vec::new(),
                skipped: true,
            });
        };

        let payload = serde_json::to_vec(&event).map_err(|e| IngestError::PublishFailed {
            topics: self.topics.clone(),
            detail: e.to_string(),
        })?;

        let mut sent = Vec::new();
        let mut tickets = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();
        for topic in &self.topics {
            let attempt = tokio::time::timeout(
                self.send_timeout,
                transport.send(topic, artifact.as_str(), &payload),
            )
            .await
            .unwrap_or(Err(TransportError::Timeout(self.send_timeout)));
            match attempt {
                Ok(ticket) => {
                    debug!(topic = %topic, repo_name = %artifact, ticket = ticket.0, "Scan event handed to transport");
                    sent.push(topic.clone());
                    tickets.push(ticket);
                }
                Err(e) => {
                    error!(topic = %topic, repo_name = %artifact, error = %e, "Failed to send scan event");
                    failures.push((topic.clone(), e.to_string()));
                }
            }
        }

        match transport.flush(&tickets, self.flush_timeout).await {
            Ok(()) => {}
            Err(TransportError::Undelivered(topics)) => {
                for topic in topics {
                    error!(topic = %topic, repo_name = %artifact, "Scan event not confirmed by broker");
                    sent.retain(|t| *t != topic);
                    failures.push((topic, "not confirmed by broker".to_string()));
                }
            }
            Err(e) => {
                error!(repo_name = %artifact, error = %e, "Flushing scan events failed");
                for topic in sent.drain(..) {
                    failures.push((topic, e.to_string()));
                }
            }
        }

        if failures.is_empty() {
            info!(repo_name = %artifact, topics = ?sent, "Scan event published");
            Ok(PublishReport {
                event,
                delivered: sent,
                skipped: false,
            })
        } else {
            let detail = failures
                .iter()
                .map(|(topic, reason)| format!("{topic}: {reason}"))
                .collect::<Vec<_>>()
                .join("; ");
            Err(IngestError::PublishFailed {
                topics: failures.into_iter().map(|(topic, _)| topic).collect(),
                detail,
            })
        }
    }

    /// Wait for anything still in flight. Call once before dropping the
    /// publisher.
    pub async fn shutdown(&self) {
        if let Some(transport) = &self.transport {
            match transport.drain(self.flush_timeout).await {
                Ok(()) => info!("Scan event publisher flushed on shutdown"),
                Err(e) => error!(error = %e, "Flushing scan events on shutdown failed"),
            }
        }
    }
}

const REST_PROXY_CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";

type PendingSend = (String, JoinHandle<Result<(), TransportError>>);

/// [`EventTransport`] speaking the Kafka REST proxy protocol.
///
/// Each `send` spawns the HTTP request and returns immediately with a
/// ticket; `flush` joins exactly the requests named by its tickets.
pub struct RestProxyTransport {
    client: reqwest::Client,
    endpoint: String,
    max_in_flight: usize,
    next_ticket: AtomicU64,
    pending: Mutex<HashMap<DeliveryTicket, PendingSend>>,
}

impl RestProxyTransport {
    /// Build the client and probe `<endpoint>/topics`.
    pub async fn connect(endpoint: &str, config: &PublisherConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.send_timeout())
            .build()?;
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let probe = client
            .get(format!("{endpoint}/topics"))
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        if !probe.status().is_success() {
            return Err(TransportError::Unavailable(format!(
                "probe of {endpoint}/topics returned HTTP {}",
                probe.status()
            )));
        }

        Ok(Self {
            client,
            endpoint,
            max_in_flight: config.max_in_flight.max(1),
            next_ticket: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        })
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<DeliveryTicket, PendingSend>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn confirm(batch: Vec<PendingSend>, timeout: Duration) -> Result<(), TransportError> {
        if batch.is_empty() {
            return Ok(());
        }
        let (topics, handles): (Vec<String>, Vec<_>) = batch.into_iter().unzip();
        let results = tokio::time::timeout(timeout, join_all(handles))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?;

        let mut undelivered = Vec::new();
        for (topic, result) in topics.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => debug!(topic = %topic, "Broker confirmed record"),
                Ok(Err(e)) => {
                    warn!(topic = %topic, error = %e, "Broker did not accept record");
                    undelivered.push(topic);
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Send task failed");
                    undelivered.push(topic);
                }
            }
        }
        if undelivered.is_empty() {
            Ok(())
        } else {
            Err(TransportError::Undelivered(undelivered))
        }
    }
}

#[async_trait]
impl EventTransport for RestProxyTransport {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<DeliveryTicket, TransportError> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let body = serde_json::json!({ "records": [{ "key": key, "value": value }] });

        let mut pending = self.pending();
        if pending.len() >= self.max_in_flight {
            return Err(TransportError::QueueFull {
                capacity: self.max_in_flight,
            });
        }

        let request = self
            .client
            .post(format!("{}/topics/{}", self.endpoint, topic))
            .header(reqwest::header::CONTENT_TYPE, REST_PROXY_CONTENT_TYPE)
            .body(body.to_string());
        let topic_name = topic.to_string();
        let handle = tokio::spawn(async move {
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => return Err(TransportError::Http(e)),
            };
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::Rejected {
                    topic: topic_name,
                    status: status.as_u16(),
                    body,
                })
            }
        });
        let ticket = DeliveryTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        pending.insert(ticket, (topic.to_string(), handle));
        Ok(ticket)
    }

    async fn flush(&self, tickets: &[DeliveryTicket], timeout: Duration) -> Result<(), TransportError> {
        let batch: Vec<PendingSend> = {
            let mut pending = self.pending();
            tickets.iter().filter_map(|ticket| pending.remove(ticket)).collect()
        };
        Self::confirm(batch, timeout).await
    }

    async fn drain(&self, timeout: Duration) -> Result<(), TransportError> {
        let batch: Vec<PendingSend> = self.pending().drain().map(|(_, send)| send).collect();
        Self::confirm(batch, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_event_serializes_expected_fields() {
        let name = ArtifactName::parse("demoRepo1").unwrap();
        let event = ScanEvent::new(&name, "org42");
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["repo_name"], "demoRepo1");
        assert_eq!(json["org_id"], "org42");
        let ts = json["timestamp"].as_str().expect("timestamp is a string");
        assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "{ts}");
    }
}
