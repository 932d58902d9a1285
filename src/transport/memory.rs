//! In-memory partitioned bus.
//!
//! Stand-in for a real broker in tests and single-process deployments.
//! Each topic keeps a retained per-partition log; a consumer group gets the
//! full log replayed on attach and live events after that. Replaying on
//! re-attach is what makes delivery at-least-once rather than exactly-once.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;

use crate::domain::EventEnvelope;
use crate::Result;

use super::{EventTransport, PartitionStream, DEFAULT_PARTITIONS};

struct TopicState {
    /// Retained events, one log per partition, in publication order.
    log: Vec<Vec<EventEnvelope>>,
    /// Live senders per consumer group, one per partition.
    groups: HashMap<String, Vec<UnboundedSender<EventEnvelope>>>,
}

impl TopicState {
    fn new(partitions: usize) -> Self {
        Self {
            log: (0..partitions).map(|_| Vec::new()).collect(),
            groups: HashMap::new(),
        }
    }
}

/// Topic/partition bus backed by unbounded channels.
pub struct InMemoryBus {
    partitions: usize,
    topics: Mutex<HashMap<String, TopicState>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: usize) -> Self {
        assert!(partitions > 0, "bus needs at least one partition");
        Self {
            partitions,
            topics: Mutex::new(HashMap::new()),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Stable key-to-partition mapping. Exposed so tests can assert that
    /// two keys land on the same or different partitions.
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions
    }

    /// Total events retained on a topic across all partitions.
    pub fn retained(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(topic)
            .map(|t| t.log.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventTransport for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, envelope: &EventEnvelope) -> Result<()> {
        let partition = self.partition_for(key);
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.partitions));

        state.log[partition].push(envelope.clone());

        for senders in state.groups.values() {
            // A closed receiver means the group worker stopped; the event
            // stays in the retained log for the next attach.
            let _ = senders[partition].send(envelope.clone());
        }

        debug!(topic, partition, event_id = %envelope.event_id, kind = %envelope.kind, "published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Vec<PartitionStream>> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.partitions));

        let mut senders = Vec::with_capacity(self.partitions);
        let mut streams = Vec::with_capacity(self.partitions);
        for partition in 0..self.partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            for envelope in &state.log[partition] {
                let _ = tx.send(envelope.clone());
            }
            senders.push(tx);
            streams.push(PartitionStream::new(partition, rx));
        }

        state.groups.insert(group.to_string(), senders);
        debug!(topic, group, partitions = self.partitions, "group attached");
        Ok(streams)
    }
}
