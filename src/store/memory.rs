//! In-memory replica store for tests and single-process setups.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{ActorId, ActorProjection, EventEnvelope, SubjectAggregate, SubjectId};
use crate::projector::{ApplyOutcome, InteractionChange, ProjectionChange};
use crate::{ReplicationError, Result};

use super::AggregateStore;

#[derive(Default)]
struct Inner {
    aggregates: HashMap<SubjectId, SubjectAggregate>,
    projections: HashMap<(SubjectId, ActorId), ActorProjection>,
    applied: HashSet<Uuid>,
}

/// Hash-map implementation of [`AggregateStore`]. Mutations happen under one
/// write lock, which gives the same atomicity as the SQL transaction.
pub struct InMemoryAggregateStore {
    inner: RwLock<Inner>,
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub async fn applied_count(&self) -> usize {
        self.inner.read().await.applied.len()
    }

    fn apply_interaction(
        inner: &mut Inner,
        envelope: &EventEnvelope,
        change: &InteractionChange,
    ) -> Result<()> {
        let pair = (envelope.subject_id, envelope.actor_id);

        if let Some(required) = change.requires_prior {
            let satisfied = inner
                .projections
                .get(&pair)
                .map(|p| match required {
                    crate::domain::InteractionKind::Like => p.liked,
                    crate::domain::InteractionKind::Dislike => p.disliked,
                })
                .unwrap_or(false);
            if !satisfied {
                return Err(ReplicationError::ProjectionGap {
                    event_id: envelope.event_id,
                    subject_id: envelope.subject_id,
                    actor_id: envelope.actor_id,
                    kind: envelope.kind,
                });
            }
        }

        let aggregate = inner
            .aggregates
            .entry(envelope.subject_id)
            .or_insert_with(|| SubjectAggregate::new(envelope.subject_id, envelope.occurred_at));
        aggregate.like_count = add_clamped(aggregate.like_count, change.like_delta);
        aggregate.dislike_count = add_clamped(aggregate.dislike_count, change.dislike_delta);
        aggregate.comment_count = add_clamped(aggregate.comment_count, change.comment_delta);
        aggregate.share_count = add_clamped(aggregate.share_count, change.share_delta);

        let projection = inner.projections.entry(pair).or_insert_with(|| {
            ActorProjection::neutral(envelope.actor_id, envelope.subject_id, envelope.occurred_at)
        });
        if let Some(liked) = change.liked {
            projection.liked = liked;
        }
        if let Some(disliked) = change.disliked {
            projection.disliked = disliked;
        }
        if let Some(commented) = change.commented {
            projection.commented = commented;
        }
        if let Some(shared) = change.shared {
            projection.shared = shared;
        }
        projection.last_interaction_at = envelope.occurred_at;

        Ok(())
    }
}

impl Default for InMemoryAggregateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn add_clamped(current: u64, delta: i64) -> u64 {
    if delta >= 0 {
        current.saturating_add(delta as u64)
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn apply_event(
        &self,
        envelope: &EventEnvelope,
        change: &ProjectionChange,
    ) -> Result<ApplyOutcome> {
        let mut inner = self.inner.write().await;

        if !inner.applied.insert(envelope.event_id) {
            return Ok(ApplyOutcome::DuplicateSkipped);
        }

        let outcome = match change {
            ProjectionChange::CreateSubject => {
                inner
                    .aggregates
                    .entry(envelope.subject_id)
                    .or_insert_with(|| {
                        SubjectAggregate::new(envelope.subject_id, envelope.occurred_at)
                    });
                ApplyOutcome::Applied
            }
            ProjectionChange::DeleteSubject => {
                inner.aggregates.remove(&envelope.subject_id);
                inner
                    .projections
                    .retain(|(subject_id, _), _| *subject_id != envelope.subject_id);
                ApplyOutcome::Applied
            }
            ProjectionChange::SetEnabled(enabled) => {
                inner
                    .aggregates
                    .entry(envelope.subject_id)
                    .or_insert_with(|| {
                        SubjectAggregate::new(envelope.subject_id, envelope.occurred_at)
                    })
                    .enabled = *enabled;
                ApplyOutcome::Applied
            }
            ProjectionChange::Interaction(change) => {
                match Self::apply_interaction(&mut inner, envelope, change) {
                    Ok(()) => ApplyOutcome::Applied,
                    Err(ReplicationError::ProjectionGap { .. }) => ApplyOutcome::Gap,
                    Err(e) => return Err(e),
                }
            }
        };

        Ok(outcome)
    }

    async fn aggregate(&self, subject_id: SubjectId) -> Result<Option<SubjectAggregate>> {
        Ok(self.inner.read().await.aggregates.get(&subject_id).cloned())
    }

    async fn projection(
        &self,
        subject_id: SubjectId,
        actor_id: ActorId,
    ) -> Result<Option<ActorProjection>> {
        Ok(self
            .inner
            .read()
            .await
            .projections
            .get(&(subject_id, actor_id))
            .cloned())
    }
}
