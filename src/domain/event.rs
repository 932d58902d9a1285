//! Event envelope and event kinds.
//!
//! The envelope is the contract between the write-side ledger and the
//! read-side projector. It is immutable once emitted, delivered at least
//! once, and must be safely re-appliable: `event_id` is the idempotency key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::{ActorId, SubjectId};

/// Closed set of engagement state transitions carried on the bus.
///
/// Adding a kind is a compile-time exercise: every `match` over this enum
/// in the projector is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Subject created on the write side; replica inserts a zeroed aggregate
    #[serde(rename = "CREATE")]
    Created,
    /// Subject removed; replica drops the aggregate and its projections
    #[serde(rename = "DELETE")]
    Deleted,
    #[serde(rename = "ENABLE")]
    Enabled,
    #[serde(rename = "DISABLE")]
    Disabled,
    /// NEUTRAL -> LIKED
    #[serde(rename = "LIKE")]
    Liked,
    /// NEUTRAL -> DISLIKED
    #[serde(rename = "DISLIKE")]
    Disliked,
    /// LIKED -> NEUTRAL
    #[serde(rename = "REMOVE_LIKE")]
    LikeRemoved,
    /// DISLIKED -> NEUTRAL
    #[serde(rename = "REMOVE_DISLIKE")]
    DislikeRemoved,
    /// DISLIKED -> LIKED
    #[serde(rename = "CHANGE_TO_LIKE")]
    ChangedToLike,
    /// LIKED -> DISLIKED
    #[serde(rename = "CHANGE_TO_DISLIKE")]
    ChangedToDislike,
    /// Monotonic: never decremented by this pipeline
    #[serde(rename = "COMMENT")]
    Commented,
    /// Monotonic: never decremented by this pipeline
    #[serde(rename = "SHARE")]
    Shared,
}

impl EventKind {
    /// Wire name, stable across services
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "CREATE",
            EventKind::Deleted => "DELETE",
            EventKind::Enabled => "ENABLE",
            EventKind::Disabled => "DISABLE",
            EventKind::Liked => "LIKE",
            EventKind::Disliked => "DISLIKE",
            EventKind::LikeRemoved => "REMOVE_LIKE",
            EventKind::DislikeRemoved => "REMOVE_DISLIKE",
            EventKind::ChangedToLike => "CHANGE_TO_LIKE",
            EventKind::ChangedToDislike => "CHANGE_TO_DISLIKE",
            EventKind::Commented => "COMMENT",
            EventKind::Shared => "SHARE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CREATE" => EventKind::Created,
            "DELETE" => EventKind::Deleted,
            "ENABLE" => EventKind::Enabled,
            "DISABLE" => EventKind::Disabled,
            "LIKE" => EventKind::Liked,
            "DISLIKE" => EventKind::Disliked,
            "REMOVE_LIKE" => EventKind::LikeRemoved,
            "REMOVE_DISLIKE" => EventKind::DislikeRemoved,
            "CHANGE_TO_LIKE" => EventKind::ChangedToLike,
            "CHANGE_TO_DISLIKE" => EventKind::ChangedToDislike,
            "COMMENT" => EventKind::Commented,
            "SHARE" => EventKind::Shared,
            _ => return None,
        })
    }

    /// All kinds, in wire order. Useful for exhaustive test sweeps.
    pub const ALL: [EventKind; 12] = [
        EventKind::Created,
        EventKind::Deleted,
        EventKind::Enabled,
        EventKind::Disabled,
        EventKind::Liked,
        EventKind::Disliked,
        EventKind::LikeRemoved,
        EventKind::DislikeRemoved,
        EventKind::ChangedToLike,
        EventKind::ChangedToDislike,
        EventKind::Commented,
        EventKind::Shared,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical event envelope describing one engagement state transition.
///
/// JSON wire shape:
/// `{eventId, subjectId, actorId, eventType, occurredAt, extra}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Globally unique event identifier; the idempotency key for projection
    pub event_id: Uuid,

    /// Subject the transition applies to; also the partition key
    pub subject_id: SubjectId,

    /// Actor that triggered the transition
    pub actor_id: ActorId,

    /// The state transition
    #[serde(rename = "eventType")]
    pub kind: EventKind,

    /// Write-side timestamp of the mutation (metadata, not used for ordering)
    pub occurred_at: DateTime<Utc>,

    /// Free-form string metadata (e.g. title/category hints for downstream
    /// consumers). Never interpreted by the projector's counter logic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl EventEnvelope {
    /// Build a new envelope with a fresh `event_id` and the current time.
    pub fn new(subject_id: SubjectId, actor_id: ActorId, kind: EventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            subject_id,
            actor_id,
            kind,
            occurred_at: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Partitioning key: events for the same subject share a partition and
    /// are therefore consumed in publication order.
    pub fn partition_key(&self) -> String {
        self.subject_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_wire_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("FOLLOW"), None);
    }

    #[test]
    fn test_envelope_serialization_round_trip() {
        let envelope = EventEnvelope::new(SubjectId::new(), ActorId::new(), EventKind::Liked)
            .with_extra("title", "first post");

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, envelope);
        assert!(json.contains("\"eventType\":\"LIKE\""));
    }

    #[test]
    fn test_envelopes_get_distinct_event_ids() {
        let subject = SubjectId::new();
        let actor = ActorId::new();
        let a = EventEnvelope::new(subject, actor, EventKind::Shared);
        let b = EventEnvelope::new(subject, actor, EventKind::Shared);
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_partition_key_is_subject_scoped() {
        let subject = SubjectId::new();
        let a = EventEnvelope::new(subject, ActorId::new(), EventKind::Liked);
        let b = EventEnvelope::new(subject, ActorId::new(), EventKind::Commented);
        assert_eq!(a.partition_key(), b.partition_key());
    }

    #[test]
    fn test_empty_extra_is_omitted_on_the_wire() {
        let envelope = EventEnvelope::new(SubjectId::new(), ActorId::new(), EventKind::Created);
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("extra"));
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert!(parsed.extra.is_empty());
    }
}
