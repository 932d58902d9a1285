//! Partitioned projector workers.
//!
//! One task per partition, so events for a subject are applied in the order
//! they were published while distinct subjects proceed in parallel. An apply
//! error skips the event and keeps the partition moving; redelivery on the
//! next group attach picks it up again.

use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::metrics::{metric_names, MetricsRegistry};
use crate::transport::{EventTransport, PartitionStream};
use crate::{ReplicationError, Result};

use super::{ApplyOutcome, Projector};

/// Running totals across all partition workers.
#[derive(Debug, Default, Clone)]
pub struct ProjectorPoolStats {
    pub events_processed: u64,
    pub events_applied: u64,
    pub duplicates_skipped: u64,
    pub gaps: u64,
    pub errors: u64,
}

/// Owns the consumer-group subscription and its partition workers.
pub struct ProjectorPool {
    transport: Arc<dyn EventTransport>,
    projector: Arc<Projector>,
    metrics: Arc<MetricsRegistry>,
    topic: String,
    group: String,
    stats: Arc<RwLock<ProjectorPoolStats>>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ProjectorPool {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        projector: Arc<Projector>,
        metrics: Arc<MetricsRegistry>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            projector,
            metrics,
            topic: topic.into(),
            group: group.into(),
            stats: Arc::new(RwLock::new(ProjectorPoolStats::default())),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn stats(&self) -> ProjectorPoolStats {
        self.stats.read().await.clone()
    }

    /// Attach the group and spawn one worker per partition.
    pub async fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(ReplicationError::Internal(
                "projector pool already running".to_string(),
            ));
        }

        let streams = self.transport.subscribe(&self.topic, &self.group).await?;
        let partitions = streams.len();

        for stream in streams {
            let projector = self.projector.clone();
            let stats = self.stats.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(run_partition(
                stream, projector, stats, shutdown,
            )));
        }

        self.metrics
            .set_gauge(metric_names::PARTITION_WORKERS, partitions as u64)
            .await;
        info!(
            topic = %self.topic,
            group = %self.group,
            partitions,
            "projector pool started"
        );
        Ok(())
    }

    /// Signal shutdown and wait for every worker to drain.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.metrics
            .set_gauge(metric_names::PARTITION_WORKERS, 0)
            .await;
        info!(topic = %self.topic, group = %self.group, "projector pool stopped");
    }
}

async fn run_partition(
    mut stream: PartitionStream,
    projector: Arc<Projector>,
    stats: Arc<RwLock<ProjectorPoolStats>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let partition = stream.partition;
    loop {
        let envelope = tokio::select! {
            envelope = stream.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
            _ = shutdown.changed() => {
                // drain what is already queued, then exit
                while let Some(envelope) = stream.try_recv() {
                    apply_one(&projector, &stats, partition, &envelope).await;
                }
                break;
            }
        };

        apply_one(&projector, &stats, partition, &envelope).await;
    }
}

async fn apply_one(
    projector: &Projector,
    stats: &RwLock<ProjectorPoolStats>,
    partition: usize,
    envelope: &crate::domain::EventEnvelope,
) {
    let result = projector.apply(envelope).await;
    let mut stats = stats.write().await;
    stats.events_processed += 1;

    match result {
        Ok(ApplyOutcome::Applied) => stats.events_applied += 1,
        Ok(ApplyOutcome::DuplicateSkipped) => stats.duplicates_skipped += 1,
        Ok(ApplyOutcome::Gap) => stats.gaps += 1,
        Err(e) => {
            stats.errors += 1;
            error!(
                partition,
                event_id = %envelope.event_id,
                kind = %envelope.kind,
                error = %e,
                "apply failed, skipping event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActorId, EventEnvelope, EventKind, SubjectId};
    use crate::store::{AggregateStore, InMemoryAggregateStore};
    use crate::transport::InMemoryBus;
    use std::time::Duration;

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_pool_applies_published_events() {
        let bus: Arc<InMemoryBus> = Arc::new(InMemoryBus::with_partitions(4));
        let store = Arc::new(InMemoryAggregateStore::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let projector = Arc::new(Projector::new(store.clone(), metrics.clone()));
        let pool = ProjectorPool::new(
            bus.clone(),
            projector,
            metrics.clone(),
            "engagement",
            "replica",
        );
        pool.start().await.unwrap();

        let subject = SubjectId::new();
        let actor = ActorId::new();
        let key = subject.to_string();
        for kind in [EventKind::Created, EventKind::Liked, EventKind::Commented] {
            bus.publish("engagement", &key, &EventEnvelope::new(subject, actor, kind))
                .await
                .unwrap();
        }

        wait_for(|| async {
            store
                .aggregate(subject)
                .await
                .unwrap()
                .map(|a| a.like_count == 1 && a.comment_count == 1)
                .unwrap_or(false)
        })
        .await;

        pool.stop().await;
        let stats = pool.stats().await;
        assert_eq!(stats.events_applied, 3);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_pool_dedupes_redelivery() {
        let bus: Arc<InMemoryBus> = Arc::new(InMemoryBus::with_partitions(2));
        let store = Arc::new(InMemoryAggregateStore::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let projector = Arc::new(Projector::new(store.clone(), metrics.clone()));

        let subject = SubjectId::new();
        let actor = ActorId::new();
        let key = subject.to_string();
        bus.publish(
            "engagement",
            &key,
            &EventEnvelope::new(subject, actor, EventKind::Created),
        )
        .await
        .unwrap();
        bus.publish(
            "engagement",
            &key,
            &EventEnvelope::new(subject, actor, EventKind::Liked),
        )
        .await
        .unwrap();

        // first pool run consumes both, second run replays the retained log
        for _ in 0..2 {
            let pool = ProjectorPool::new(
                bus.clone(),
                projector.clone(),
                metrics.clone(),
                "engagement",
                "replica",
            );
            pool.start().await.unwrap();
            wait_for(|| async { pool.stats().await.events_processed >= 2 }).await;
            pool.stop().await;
        }

        let aggregate = store.aggregate(subject).await.unwrap().unwrap();
        assert_eq!(aggregate.like_count, 1);
        assert_eq!(
            metrics.get_counter(metric_names::DUPLICATES_SKIPPED).await,
            2
        );
    }
}
