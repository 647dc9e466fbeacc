//! Broadcast gateway: fan-out of state transitions to subscribed
//! observers over NATS.
//!
//! Publishing is at-least-once best effort with bounded retry. A
//! failed publish is logged and counted, never propagated into the
//! state transition that caused it; the one exception is the heal
//! path, which explicitly awaits a confirmed `system-restore`
//! broadcast before committing.

use anyhow::Context;
use async_nats::ConnectOptions;
use metrics::counter;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, VigilError};
use vigil_common::{
    events::{AdminEvent, GlobalThreatEvent, LicenseEvent},
    license_subject, ADMIN_SUBJECT, GLOBAL_THREAT_SUBJECT,
};

/// One event as it left the gateway. Kept by the in-memory sink for
/// tests and NATS-less deployments.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub subject: String,
    pub payload: serde_json::Value,
}

/// Captures published events instead of sending them anywhere.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<PublishedEvent>>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Count events on `subject` whose `event` tag equals `tag`.
    pub fn count(&self, subject: &str, tag: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.subject == subject && e.payload["event"] == tag)
            .count()
    }

    fn push(&self, event: PublishedEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

enum Sink {
    Nats {
        client: async_nats::Client,
        retries: u32,
    },
    Memory(MemorySink),
}

/// Fan-out of engine events to the three channel families.
pub struct BroadcastGateway {
    sink: Sink,
}

impl BroadcastGateway {
    /// Connect to NATS with the retry/backoff profile used across the
    /// deployment.
    pub async fn connect(url: &str, retries: u32) -> anyhow::Result<Self> {
        info!(nats_url = %url, "Connecting to NATS server");

        let options = ConnectOptions::new()
            .retry_on_initial_connect()
            .reconnect_delay_callback(|attempts| {
                if attempts < 10 {
                    Duration::from_millis(200 * attempts as u64)
                } else {
                    Duration::from_secs(10)
                }
            });

        let client = async_nats::connect_with_options(url, options)
            .await
            .context("Failed to connect to NATS server")?;

        info!("Successfully connected to NATS server");
        Ok(Self {
            sink: Sink::Nats { client, retries },
        })
    }

    /// Gateway backed by an in-memory sink; used when broadcast is
    /// disabled and by tests.
    pub fn in_memory() -> (Self, MemorySink) {
        let sink = MemorySink::default();
        (
            Self {
                sink: Sink::Memory(sink.clone()),
            },
            sink,
        )
    }

    /// Publish to a license's private channel.
    pub async fn license(&self, license_key: &str, event: &LicenseEvent) -> Result<()> {
        self.publish(&license_subject(license_key), event).await
    }

    /// Publish to the admin-wide channel.
    pub async fn admin(&self, event: &AdminEvent) -> Result<()> {
        self.publish(ADMIN_SUBJECT, event).await
    }

    /// Publish to the global threat channel mirrored to all edges.
    pub async fn global(&self, event: &GlobalThreatEvent) -> Result<()> {
        self.publish(GLOBAL_THREAT_SUBJECT, event).await
    }

    async fn publish<E: Serialize>(&self, subject: &str, event: &E) -> Result<()> {
        let payload = serde_json::to_vec(event)?;

        match &self.sink {
            Sink::Memory(sink) => {
                let value: serde_json::Value = serde_json::from_slice(&payload)?;
                debug!(subject = %subject, event = %value["event"], "Captured broadcast event");
                sink.push(PublishedEvent {
                    subject: subject.to_string(),
                    payload: value,
                });
                counter!("vigil_broadcasts_total", 1);
                Ok(())
            }
            Sink::Nats { client, retries } => {
                let mut attempt = 0u32;
                loop {
                    let result: std::result::Result<
                        (),
                        Box<dyn std::error::Error + Send + Sync>,
                    > = async {
                        client
                            .publish(subject.to_string(), payload.clone().into())
                            .await?;
                        client.flush().await?;
                        Ok(())
                    }
                    .await;

                    match result {
                        Ok(()) => {
                            debug!(subject = %subject, "Published broadcast event");
                            counter!("vigil_broadcasts_total", 1);
                            return Ok(());
                        }
                        Err(e) if attempt < *retries => {
                            attempt += 1;
                            warn!(
                                subject = %subject,
                                attempt,
                                error = %e,
                                "Broadcast publish failed, retrying"
                            );
                            tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                        }
                        Err(e) => {
                            counter!("vigil_broadcast_failures_total", 1);
                            return Err(VigilError::Broadcast(format!(
                                "publish to {subject} failed after {attempt} retries: {e}"
                            )));
                        }
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for BroadcastGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.sink {
            Sink::Nats { .. } => "nats",
            Sink::Memory(_) => "memory",
        };
        f.debug_struct("BroadcastGateway").field("sink", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_memory_sink_captures_events_by_subject() {
        let (gateway, sink) = BroadcastGateway::in_memory();

        gateway
            .admin(&AdminEvent::SecurityAlert {
                license_key: "VGL-1".to_string(),
                status: "TAMPERED".to_string(),
                detail: "dom mutation".to_string(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        gateway
            .license(
                "VGL-1",
                &LicenseEvent::SystemRelease {
                    license_key: "VGL-1".to_string(),
                    actor: "admin".to_string(),
                    timestamp: Utc::now(),
                },
            )
            .await
            .unwrap();

        assert_eq!(sink.count(ADMIN_SUBJECT, "security-alert"), 1);
        assert_eq!(sink.count("vigil.license.VGL-1", "system-release"), 1);
        assert_eq!(sink.count("vigil.license.VGL-1", "system-restore"), 0);
        assert_eq!(sink.events().len(), 2);
    }

    #[tokio::test]
    async fn test_global_events_land_on_the_mirror_subject() {
        let (gateway, sink) = BroadcastGateway::in_memory();
        gateway
            .global(&GlobalThreatEvent::GlobalBan {
                ip: "9.9.9.9".parse().unwrap(),
                reason: "admin ban".to_string(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(sink.count(GLOBAL_THREAT_SUBJECT, "global-ban"), 1);
    }
}
