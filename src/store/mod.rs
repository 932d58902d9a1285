//! Denormalized aggregate store on the read side.
//!
//! `apply_event` is the single mutation primitive and it is atomic: the
//! dedupe marker, the counter adjustment, and the flag update commit
//! together or not at all. Callers never read-modify-write counters.

mod memory;
mod sqlite;

pub use memory::InMemoryAggregateStore;
pub use sqlite::SqliteAggregateStore;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::{ActorId, ActorProjection, EventEnvelope, SubjectAggregate, SubjectId};
use crate::projector::{ApplyOutcome, ProjectionChange};
use crate::Result;

/// Read-side store contract.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Apply one event's change atomically with its dedupe marker.
    ///
    /// Returns `DuplicateSkipped` when the event id is already marked,
    /// `Gap` when a removal has no prior projection to remove from (the
    /// marker is still recorded), and `Applied` otherwise.
    async fn apply_event(
        &self,
        envelope: &EventEnvelope,
        change: &ProjectionChange,
    ) -> Result<ApplyOutcome>;

    /// Replica aggregate for a subject.
    async fn aggregate(&self, subject_id: SubjectId) -> Result<Option<SubjectAggregate>>;

    /// Per-actor flags for a pair; `None` when the pair never interacted.
    async fn projection(
        &self,
        subject_id: SubjectId,
        actor_id: ActorId,
    ) -> Result<Option<ActorProjection>>;
}
