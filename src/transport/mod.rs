//! Event transport contract.
//!
//! The bus is topic-and-partition shaped: events published with the same
//! partition key land on the same partition and are delivered to each
//! consumer group in publication order. Delivery is at-least-once; the
//! read side dedupes, so redelivery is safe.

mod memory;

pub use memory::InMemoryBus;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::domain::EventEnvelope;
use crate::Result;

/// Default partition count for the in-memory bus.
pub const DEFAULT_PARTITIONS: usize = 16;

/// Ordered stream of events from one partition of a topic.
pub struct PartitionStream {
    pub partition: usize,
    receiver: UnboundedReceiver<EventEnvelope>,
}

impl PartitionStream {
    pub(crate) fn new(partition: usize, receiver: UnboundedReceiver<EventEnvelope>) -> Self {
        Self {
            partition,
            receiver,
        }
    }

    /// Next event on this partition, or `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.recv().await
    }

    /// Non-blocking variant for drain loops.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.try_recv().ok()
    }
}

/// Publish/subscribe seam between the write side and the projectors.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Publish one envelope. The key selects the partition, so all events
    /// for one subject stay ordered relative to each other.
    async fn publish(&self, topic: &str, key: &str, envelope: &EventEnvelope) -> Result<()>;

    /// Attach a consumer group to a topic and receive one stream per
    /// partition. Events retained before the group attached are replayed
    /// first, which is also how redelivery after a group restart works.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Vec<PartitionStream>>;
}
