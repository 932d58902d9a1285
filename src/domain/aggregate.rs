//! Denormalized read models maintained by the projector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActorId, SubjectId};

/// Running engagement counters for one subject.
///
/// On the write side these columns are authoritative and mutated in the same
/// transaction as the interaction record. On the replica they are derived
/// solely from applied events and may lag by the replication latency bound.
/// Counters are clamped at zero by every store implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAggregate {
    pub subject_id: SubjectId,
    pub enabled: bool,
    pub like_count: u64,
    pub dislike_count: u64,
    pub comment_count: u64,
    pub share_count: u64,
    pub created_at: DateTime<Utc>,
}

impl SubjectAggregate {
    /// Fresh aggregate with all counters zero, as inserted on CREATE.
    pub fn new(subject_id: SubjectId, created_at: DateTime<Utc>) -> Self {
        Self {
            subject_id,
            enabled: true,
            like_count: 0,
            dislike_count: 0,
            comment_count: 0,
            share_count: 0,
            created_at,
        }
    }

    /// Popularity signal used to scale cache TTLs for this subject.
    pub fn popularity(&self) -> u64 {
        self.like_count + self.comment_count + self.share_count
    }
}

/// Per-(actor, subject) interaction flags on the replica.
///
/// Created on the first event referencing the pair, updated in place, never
/// deleted while the subject lives: the history of having interacted is
/// retained after toggle-off, only the booleans flip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorProjection {
    pub actor_id: ActorId,
    pub subject_id: SubjectId,
    pub liked: bool,
    pub disliked: bool,
    pub commented: bool,
    pub shared: bool,
    pub last_interaction_at: DateTime<Utc>,
}

impl ActorProjection {
    /// Neutral projection row for a pair that has not interacted yet.
    pub fn neutral(actor_id: ActorId, subject_id: SubjectId, at: DateTime<Utc>) -> Self {
        Self {
            actor_id,
            subject_id,
            liked: false,
            disliked: false,
            commented: false,
            shared: false,
            last_interaction_at: at,
        }
    }
}
