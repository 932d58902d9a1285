//! Write-side interaction ledger.
//!
//! Authoritative per-(actor, subject) interaction records plus aggregate
//! counters on the subject row, mutated together in one transaction so the
//! write side's own reads are immediately consistent. The state machine per
//! pair is `NEUTRAL <-> LIKED <-> DISLIKED` driven by `like()`/`dislike()`
//! toggle requests.

mod sqlite;

pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{
    ActorId, EventEnvelope, EventKind, InteractionKind, SubjectAggregate, SubjectId,
};
use crate::Result;

/// One step of the per-pair interaction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    NeutralToLiked,
    LikedToNeutral,
    DislikedToLiked,
    NeutralToDisliked,
    DislikedToNeutral,
    LikedToDisliked,
}

impl Transition {
    /// Resolve a toggle request against the current ledger state.
    ///
    /// `like()` on a LIKED pair removes the record; on a DISLIKED pair flips
    /// it; on a NEUTRAL pair creates it. `dislike()` is the mirror. Because
    /// the current state is read under the same row lock that the mutation
    /// takes, concurrent toggles by the same actor resolve deterministically.
    pub fn resolve(current: Option<InteractionKind>, requested: InteractionKind) -> Self {
        match (current, requested) {
            (None, InteractionKind::Like) => Transition::NeutralToLiked,
            (Some(InteractionKind::Like), InteractionKind::Like) => Transition::LikedToNeutral,
            (Some(InteractionKind::Dislike), InteractionKind::Like) => Transition::DislikedToLiked,
            (None, InteractionKind::Dislike) => Transition::NeutralToDisliked,
            (Some(InteractionKind::Dislike), InteractionKind::Dislike) => {
                Transition::DislikedToNeutral
            }
            (Some(InteractionKind::Like), InteractionKind::Dislike) => {
                Transition::LikedToDisliked
            }
        }
    }

    /// The event emitted for this transition.
    pub fn event_kind(&self) -> EventKind {
        match self {
            Transition::NeutralToLiked => EventKind::Liked,
            Transition::LikedToNeutral => EventKind::LikeRemoved,
            Transition::DislikedToLiked => EventKind::ChangedToLike,
            Transition::NeutralToDisliked => EventKind::Disliked,
            Transition::DislikedToNeutral => EventKind::DislikeRemoved,
            Transition::LikedToDisliked => EventKind::ChangedToDislike,
        }
    }

    /// Ledger state after the transition; `None` means the record is removed.
    pub fn resulting_state(&self) -> Option<InteractionKind> {
        match self {
            Transition::NeutralToLiked | Transition::DislikedToLiked => {
                Some(InteractionKind::Like)
            }
            Transition::NeutralToDisliked | Transition::LikedToDisliked => {
                Some(InteractionKind::Dislike)
            }
            Transition::LikedToNeutral | Transition::DislikedToNeutral => None,
        }
    }

    /// Authoritative `(like_count, dislike_count)` deltas, applied in the
    /// same transaction as the record mutation and clamped at zero.
    pub fn counter_deltas(&self) -> (i64, i64) {
        match self {
            Transition::NeutralToLiked => (1, 0),
            Transition::LikedToNeutral => (-1, 0),
            Transition::DislikedToLiked => (1, -1),
            Transition::NeutralToDisliked => (0, 1),
            Transition::DislikedToNeutral => (0, -1),
            Transition::LikedToDisliked => (-1, 1),
        }
    }
}

/// Result of a committed toggle: what changed and which event to emit.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleOutcome {
    pub transition: Transition,
    pub occurred_at: DateTime<Utc>,
}

impl ToggleOutcome {
    /// Build the envelope describing this committed transition. Called only
    /// after the ledger transaction has committed.
    pub fn envelope(&self, subject_id: SubjectId, actor_id: ActorId) -> EventEnvelope {
        EventEnvelope {
            occurred_at: self.occurred_at,
            ..EventEnvelope::new(subject_id, actor_id, self.transition.event_kind())
        }
    }
}

/// Authoritative write-side store contract.
///
/// Invariant: record mutation and counter adjustment commit atomically;
/// event publication is never part of the transaction.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InteractionLedger: Send + Sync {
    /// Register a subject; duplicate registration is a no-op.
    async fn create_subject(&self, subject_id: SubjectId) -> Result<SubjectAggregate>;

    /// Remove a subject and its interaction records.
    async fn delete_subject(&self, subject_id: SubjectId) -> Result<()>;

    /// Flip the enabled flag. Disabled subjects reject engagement mutations.
    async fn set_enabled(&self, subject_id: SubjectId, enabled: bool) -> Result<()>;

    /// Toggle a like for the pair; fails with `SubjectNotFound` when the
    /// subject is missing or disabled.
    async fn like(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<ToggleOutcome>;

    /// Mirror of [`InteractionLedger::like`].
    async fn dislike(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<ToggleOutcome>;

    /// Record a comment: increments the authoritative counter (monotonic).
    async fn comment(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<DateTime<Utc>>;

    /// Record a share: increments the authoritative counter (monotonic).
    async fn share(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<DateTime<Utc>>;

    /// Authoritative aggregate for the write-side read path.
    async fn aggregate(&self, subject_id: SubjectId) -> Result<Option<SubjectAggregate>>;

    /// Current ledger state for a pair; `None` means neutral.
    async fn interaction(
        &self,
        subject_id: SubjectId,
        actor_id: ActorId,
    ) -> Result<Option<InteractionKind>>;
}
