//! End-to-end replication tests: write-side ledger through the in-memory
//! bus into the partitioned projector and the replica query path.

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use engagement_sync::cache::InMemoryCacheBackend;
use engagement_sync::domain::{ActorId, EventEnvelope, EventKind, SubjectId};
use engagement_sync::metrics::MetricsRegistry;
use engagement_sync::{
    migrations, AggregateStore, EngagementService, EventTransport, InMemoryBus, LookAsideCache,
    OutboxEmitter,
    Projector, ProjectorPool, ReplicaQueryService, ReplicationError, SqliteAggregateStore,
    SqliteLedger, Transition,
};

const TOPIC: &str = "engagement";
const GROUP: &str = "replica";

struct Pipeline {
    service: EngagementService,
    replica: ReplicaQueryService,
    store: Arc<SqliteAggregateStore>,
    replica_cache: Arc<LookAsideCache>,
    bus: Arc<InMemoryBus>,
    pool: ProjectorPool,
}

async fn pipeline() -> Pipeline {
    let metrics = Arc::new(MetricsRegistry::new());
    let bus = Arc::new(InMemoryBus::with_partitions(8));

    // write side
    let ledger = Arc::new(SqliteLedger::from_url("sqlite::memory:").await.unwrap());
    let write_cache = Arc::new(LookAsideCache::new(
        Arc::new(InMemoryCacheBackend::default()),
        metrics.clone(),
    ));
    let outbox = OutboxEmitter::new(bus.clone(), TOPIC, metrics.clone());
    let service = EngagementService::new(ledger, outbox, write_cache, metrics.clone());

    // read side; single connection keeps the in-memory database shared
    // across the partition workers
    let replica_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrations::run_replica(&replica_pool).await.unwrap();
    let store = Arc::new(SqliteAggregateStore::new(replica_pool));
    let replica_cache = Arc::new(LookAsideCache::new(
        Arc::new(InMemoryCacheBackend::default()),
        metrics.clone(),
    ));
    let projector = Arc::new(
        Projector::new(store.clone(), metrics.clone()).with_cache(replica_cache.clone()),
    );
    let pool = ProjectorPool::new(bus.clone(), projector, metrics.clone(), TOPIC, GROUP);
    pool.start().await.unwrap();

    let replica = ReplicaQueryService::new(store.clone(), replica_cache.clone());

    Pipeline {
        service,
        replica,
        store,
        replica_cache,
        bus,
        pool,
    }
}

/// Wait until the projector pool has processed `n` events.
async fn drain(pipeline: &Pipeline, n: u64) {
    for _ in 0..200 {
        if pipeline.pool.stats().await.events_processed >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "projector did not reach {n} events, got {}",
        pipeline.pool.stats().await.events_processed
    );
}

#[tokio::test]
async fn test_scenario_a_like_on_fresh_subject() {
    let p = pipeline().await;
    let subject = SubjectId::new();
    let actor = ActorId::new();

    p.service.create_subject(subject, actor).await.unwrap();
    let outcome = p.service.like(subject, actor).await.unwrap();
    assert_eq!(outcome.transition, Transition::NeutralToLiked);
    assert_eq!(outcome.transition.event_kind(), EventKind::Liked);

    drain(&p, 2).await;

    let aggregate = p.replica.subject(subject).await.unwrap().unwrap();
    assert_eq!(aggregate.like_count, 1);

    let projection = p.replica.projection(subject, actor).await.unwrap().unwrap();
    assert!(projection.liked);

    p.pool.stop().await;
}

#[tokio::test]
async fn test_scenario_b_double_like_returns_to_neutral() {
    let p = pipeline().await;
    let subject = SubjectId::new();
    let actor = ActorId::new();

    p.service.create_subject(subject, actor).await.unwrap();
    let first = p.service.like(subject, actor).await.unwrap();
    let second = p.service.like(subject, actor).await.unwrap();
    assert_eq!(first.transition.event_kind(), EventKind::Liked);
    assert_eq!(second.transition.event_kind(), EventKind::LikeRemoved);

    drain(&p, 3).await;

    let aggregate = p.replica.subject(subject).await.unwrap().unwrap();
    assert_eq!(aggregate.like_count, 0);

    let projection = p.replica.projection(subject, actor).await.unwrap().unwrap();
    assert!(!projection.liked);

    p.pool.stop().await;
}

#[tokio::test]
async fn test_scenario_c_like_then_dislike_flips() {
    let p = pipeline().await;
    let subject = SubjectId::new();
    let actor = ActorId::new();

    p.service.create_subject(subject, actor).await.unwrap();
    p.service.like(subject, actor).await.unwrap();
    let flip = p.service.dislike(subject, actor).await.unwrap();
    assert_eq!(flip.transition.event_kind(), EventKind::ChangedToDislike);

    drain(&p, 3).await;

    let aggregate = p.replica.subject(subject).await.unwrap().unwrap();
    assert_eq!(aggregate.like_count, 0);
    assert_eq!(aggregate.dislike_count, 1);

    let projection = p.replica.projection(subject, actor).await.unwrap().unwrap();
    assert!(!projection.liked);
    assert!(projection.disliked);

    p.pool.stop().await;
}

#[tokio::test]
async fn test_scenario_d_duplicate_delivery_counts_once() {
    let p = pipeline().await;
    let subject = SubjectId::new();
    let actor = ActorId::new();

    p.service.create_subject(subject, actor).await.unwrap();
    drain(&p, 1).await;

    // the same envelope delivered twice, as an at-least-once bus may do
    let like = EventEnvelope::new(subject, actor, EventKind::Liked);
    let key = like.partition_key();
    p.bus.publish(TOPIC, &key, &like).await.unwrap();
    p.bus.publish(TOPIC, &key, &like).await.unwrap();

    drain(&p, 3).await;
    p.pool.stop().await;

    let aggregate = p.store.aggregate(subject).await.unwrap().unwrap();
    assert_eq!(aggregate.like_count, 1);
    assert_eq!(p.pool.stats().await.duplicates_skipped, 1);
}

#[tokio::test]
async fn test_comments_and_shares_replicate() {
    let p = pipeline().await;
    let subject = SubjectId::new();
    let actor = ActorId::new();

    p.service.create_subject(subject, actor).await.unwrap();
    p.service.comment(subject, actor).await.unwrap();
    p.service.comment(subject, actor).await.unwrap();
    p.service.share(subject, actor).await.unwrap();

    drain(&p, 4).await;

    let aggregate = p.replica.subject(subject).await.unwrap().unwrap();
    assert_eq!(aggregate.comment_count, 2);
    assert_eq!(aggregate.share_count, 1);

    let projection = p.replica.projection(subject, actor).await.unwrap().unwrap();
    assert!(projection.commented);
    assert!(projection.shared);

    p.pool.stop().await;
}

#[tokio::test]
async fn test_disabled_subject_rejects_writes_and_replicates_the_flag() {
    let p = pipeline().await;
    let subject = SubjectId::new();
    let actor = ActorId::new();

    p.service.create_subject(subject, actor).await.unwrap();
    p.service.set_enabled(subject, actor, false).await.unwrap();

    let err = p.service.like(subject, actor).await.unwrap_err();
    assert!(matches!(err, ReplicationError::SubjectNotFound(_)));

    drain(&p, 2).await;
    let aggregate = p.replica.subject(subject).await.unwrap().unwrap();
    assert!(!aggregate.enabled);

    p.pool.stop().await;
}

#[tokio::test]
async fn test_delete_replicates_to_the_read_side() {
    let p = pipeline().await;
    let subject = SubjectId::new();
    let actor = ActorId::new();

    p.service.create_subject(subject, actor).await.unwrap();
    p.service.like(subject, actor).await.unwrap();
    drain(&p, 2).await;
    assert!(p.replica.subject(subject).await.unwrap().is_some());

    p.service.delete_subject(subject, actor).await.unwrap();
    drain(&p, 3).await;

    assert!(p.store.aggregate(subject).await.unwrap().is_none());
    assert!(p.store.projection(subject, actor).await.unwrap().is_none());

    p.pool.stop().await;
}

#[tokio::test]
async fn test_cache_coherence_after_projection() {
    let p = pipeline().await;
    let subject = SubjectId::new();
    let actor = ActorId::new();

    p.service.create_subject(subject, actor).await.unwrap();
    drain(&p, 1).await;

    // prime the replica cache
    let before = p.replica.subject(subject).await.unwrap().unwrap();
    assert_eq!(before.like_count, 0);
    assert!(p.replica_cache.get_subject(subject).await.is_some());

    p.service.like(subject, actor).await.unwrap();
    drain(&p, 2).await;

    // the applied event invalidated the cached entry; the next read must
    // rebuild and see the new count, never the pre-invalidation value
    let after = p.replica.subject(subject).await.unwrap().unwrap();
    assert_eq!(after.like_count, 1);

    p.pool.stop().await;
}

#[tokio::test]
async fn test_per_subject_order_survives_interleaving() {
    let p = pipeline().await;
    let actor = ActorId::new();
    let subjects: Vec<SubjectId> = (0..10).map(|_| SubjectId::new()).collect();

    for subject in &subjects {
        p.service.create_subject(*subject, actor).await.unwrap();
        p.service.like(*subject, actor).await.unwrap();
        p.service.dislike(*subject, actor).await.unwrap();
        p.service.dislike(*subject, actor).await.unwrap();
    }

    drain(&p, 40).await;
    p.pool.stop().await;

    // LIKE, CHANGE_TO_DISLIKE, REMOVE_DISLIKE per subject nets everything out
    for subject in &subjects {
        let aggregate = p.store.aggregate(*subject).await.unwrap().unwrap();
        assert_eq!(aggregate.like_count, 0, "subject {subject}");
        assert_eq!(aggregate.dislike_count, 0, "subject {subject}");

        let projection = p.store.projection(*subject, actor).await.unwrap().unwrap();
        assert!(!projection.liked && !projection.disliked);
    }

    let stats = p.pool.stats().await;
    assert_eq!(stats.gaps, 0);
    assert_eq!(stats.errors, 0);
}
