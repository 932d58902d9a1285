//! Error types for the engagement replication core.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ActorId, EventKind, SubjectId};

/// Errors that can occur on either side of the replication pipeline.
///
/// Propagation policy: errors on the authoritative write path are returned
/// synchronously to the caller; errors on the asynchronous path (transport,
/// projector, cache) are contained within that path, logged, and never roll
/// back the originating write.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Mutation against a missing or disabled subject; rejected, surfaced to
    /// the caller
    #[error("subject not found or disabled: {0}")]
    SubjectNotFound(SubjectId),

    /// A removal or flip arrived with no matching prior projection state.
    /// Raised inside the store and converted to `ApplyOutcome::Gap` once the
    /// dedupe marker is committed; counters stay unchanged
    #[error("projection gap: {kind} event {event_id} for {subject_id}/{actor_id} has no prior interaction")]
    ProjectionGap {
        event_id: Uuid,
        subject_id: SubjectId,
        actor_id: ActorId,
        kind: EventKind,
    },

    /// Idempotency hit on the applied-events marker; converted to
    /// `ApplyOutcome::DuplicateSkipped` by the store, never surfaced
    #[error("duplicate event skipped: {0}")]
    DuplicateEvent(Uuid),

    /// Publish failed or timed out; the originating mutation still stands
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Cache-layer failure; treated as a miss, never surfaced to callers
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for replication operations
pub type Result<T> = std::result::Result<T, ReplicationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_error_names_the_event() {
        let event_id = Uuid::new_v4();
        let err = ReplicationError::ProjectionGap {
            event_id,
            subject_id: SubjectId::new(),
            actor_id: ActorId::new(),
            kind: EventKind::LikeRemoved,
        };
        let message = err.to_string();
        assert!(message.contains("REMOVE_LIKE"));
        assert!(message.contains(&event_id.to_string()));
    }

    #[test]
    fn test_duplicate_error_names_the_event() {
        let event_id = Uuid::new_v4();
        let err = ReplicationError::DuplicateEvent(event_id);
        assert!(err.to_string().contains(&event_id.to_string()));
    }
}
