//! Post-commit event emission.
//!
//! The emitter runs strictly after the ledger transaction commits and is
//! best-effort: a publish failure or timeout is logged and counted but never
//! surfaced, so the authoritative write always stands. Lost events show up
//! as replica staleness, not as write failures.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::domain::EventEnvelope;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::transport::EventTransport;

/// Default bound on how long one publish may block the write path.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline-bounded, best-effort publisher for committed ledger transitions.
pub struct OutboxEmitter {
    transport: Arc<dyn EventTransport>,
    topic: String,
    publish_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl OutboxEmitter {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        topic: impl Into<String>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            transport,
            topic: topic.into(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            metrics,
        }
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one committed transition, keyed by subject so per-subject
    /// order survives partitioning. Infallible by contract.
    pub async fn emit(&self, envelope: &EventEnvelope) {
        let key = envelope.partition_key();

        match timeout(
            self.publish_timeout,
            self.transport.publish(&self.topic, &key, envelope),
        )
        .await
        {
            Ok(Ok(())) => {
                self.metrics.inc_counter(metric_names::EVENTS_PUBLISHED).await;
                debug!(
                    topic = %self.topic,
                    event_id = %envelope.event_id,
                    kind = %envelope.kind,
                    "event published"
                );
            }
            Ok(Err(e)) => {
                self.metrics.inc_counter(metric_names::PUBLISH_FAILURES).await;
                warn!(
                    topic = %self.topic,
                    event_id = %envelope.event_id,
                    kind = %envelope.kind,
                    error = %e,
                    "event publish failed, write stands"
                );
            }
            Err(_) => {
                self.metrics.inc_counter(metric_names::PUBLISH_FAILURES).await;
                warn!(
                    topic = %self.topic,
                    event_id = %envelope.event_id,
                    kind = %envelope.kind,
                    timeout_ms = self.publish_timeout.as_millis() as u64,
                    "event publish timed out, write stands"
                );
            }
        }
    }
}
