//! Engagement Sync Library
//!
//! Interaction-replication and cache-coherence core: keeps a denormalized,
//! read-optimized mirror of user/content engagement (likes, dislikes,
//! comments, shares) consistent with an authoritative write-side store,
//! propagated asynchronously over an at-least-once message bus.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (ids, event envelopes, aggregates)
//! - [`ledger`] - Write-side interaction state machine and authoritative store
//! - [`outbox`] - Post-commit, best-effort event emission
//! - [`transport`] - Topic/partition bus contract and in-memory bus
//! - [`projector`] - Idempotent event application and partitioned workers
//! - [`store`] - Denormalized aggregate store (SQLite and in-memory)
//! - [`cache`] - Look-aside cache with adaptive TTL
//! - [`service`] - Write-side and replica-side facades
//! - [`metrics`] - Observability counters and gauges
//! - [`telemetry`] - Tracing subscriber bootstrap

pub mod cache;
pub mod domain;
mod error;
pub mod ledger;
pub mod metrics;
pub mod migrations;
pub mod outbox;
pub mod projector;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types
pub use domain::{
    ActorId, ActorProjection, EventEnvelope, EventKind, InteractionKind, SubjectAggregate,
    SubjectId,
};

pub use error::{ReplicationError, Result};

pub use cache::{CacheBackend, InMemoryCacheBackend, LookAsideCache, MediaPayload, TtlPolicy};
pub use ledger::{InteractionLedger, SqliteLedger, ToggleOutcome, Transition};
pub use metrics::MetricsRegistry;
pub use outbox::OutboxEmitter;
pub use projector::{ApplyOutcome, ProjectionChange, Projector, ProjectorPool};
pub use service::{EngagementService, MediaSource, ReplicaQueryService, SubjectDetail};
pub use store::{AggregateStore, InMemoryAggregateStore, SqliteAggregateStore};
pub use transport::{EventTransport, InMemoryBus};
