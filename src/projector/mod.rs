//! Idempotent read-side projection.
//!
//! Every envelope maps to a [`ProjectionChange`] through one closed,
//! exhaustive dispatch: adding an event kind without deciding its replica
//! effect is a compile error. The store applies the change together with the
//! dedupe marker, so redelivered events collapse to [`ApplyOutcome::DuplicateSkipped`].

mod worker;

pub use worker::{ProjectorPool, ProjectorPoolStats};

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::cache::LookAsideCache;
use crate::domain::{EventEnvelope, EventKind, InteractionKind};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::store::AggregateStore;
use crate::Result;

/// Result of applying one envelope to the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Counters and flags were updated.
    Applied,
    /// The event id was already marked applied; nothing changed.
    DuplicateSkipped,
    /// A removal arrived with no matching prior projection. The marker was
    /// recorded so redelivery does not retry it, counters stayed untouched.
    Gap,
}

/// Per-actor effect of an interaction event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionChange {
    pub like_delta: i64,
    pub dislike_delta: i64,
    pub comment_delta: i64,
    pub share_delta: i64,
    /// New value for the liked flag, when the event touches it.
    pub liked: Option<bool>,
    pub disliked: Option<bool>,
    pub commented: Option<bool>,
    pub shared: Option<bool>,
    /// Flag that must already be set on the projection; absence is a gap.
    pub requires_prior: Option<InteractionKind>,
}

impl InteractionChange {
    const NONE: Self = Self {
        like_delta: 0,
        dislike_delta: 0,
        comment_delta: 0,
        share_delta: 0,
        liked: None,
        disliked: None,
        commented: None,
        shared: None,
        requires_prior: None,
    };
}

/// Replica-side effect of one event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionChange {
    CreateSubject,
    DeleteSubject,
    SetEnabled(bool),
    Interaction(InteractionChange),
}

impl ProjectionChange {
    /// Closed dispatch from event kind to replica effect.
    pub fn for_kind(kind: EventKind) -> Self {
        use InteractionKind::{Dislike, Like};
        match kind {
            EventKind::Created => ProjectionChange::CreateSubject,
            EventKind::Deleted => ProjectionChange::DeleteSubject,
            EventKind::Enabled => ProjectionChange::SetEnabled(true),
            EventKind::Disabled => ProjectionChange::SetEnabled(false),
            EventKind::Liked => ProjectionChange::Interaction(InteractionChange {
                like_delta: 1,
                liked: Some(true),
                ..InteractionChange::NONE
            }),
            EventKind::LikeRemoved => ProjectionChange::Interaction(InteractionChange {
                like_delta: -1,
                liked: Some(false),
                requires_prior: Some(Like),
                ..InteractionChange::NONE
            }),
            EventKind::Disliked => ProjectionChange::Interaction(InteractionChange {
                dislike_delta: 1,
                disliked: Some(true),
                ..InteractionChange::NONE
            }),
            EventKind::DislikeRemoved => ProjectionChange::Interaction(InteractionChange {
                dislike_delta: -1,
                disliked: Some(false),
                requires_prior: Some(Dislike),
                ..InteractionChange::NONE
            }),
            EventKind::ChangedToLike => ProjectionChange::Interaction(InteractionChange {
                like_delta: 1,
                dislike_delta: -1,
                liked: Some(true),
                disliked: Some(false),
                requires_prior: Some(Dislike),
                ..InteractionChange::NONE
            }),
            EventKind::ChangedToDislike => ProjectionChange::Interaction(InteractionChange {
                like_delta: -1,
                dislike_delta: 1,
                liked: Some(false),
                disliked: Some(true),
                requires_prior: Some(Like),
                ..InteractionChange::NONE
            }),
            EventKind::Commented => ProjectionChange::Interaction(InteractionChange {
                comment_delta: 1,
                commented: Some(true),
                ..InteractionChange::NONE
            }),
            EventKind::Shared => ProjectionChange::Interaction(InteractionChange {
                share_delta: 1,
                shared: Some(true),
                ..InteractionChange::NONE
            }),
        }
    }
}

/// Applies envelopes to the aggregate store and keeps the replica cache
/// coherent.
pub struct Projector {
    store: Arc<dyn AggregateStore>,
    cache: Option<Arc<LookAsideCache>>,
    metrics: Arc<MetricsRegistry>,
}

impl Projector {
    pub fn new(store: Arc<dyn AggregateStore>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            store,
            cache: None,
            metrics,
        }
    }

    pub fn with_cache(mut self, cache: Arc<LookAsideCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Apply one envelope. Safe to call any number of times with the same
    /// envelope.
    #[instrument(skip(self, envelope), fields(event_id = %envelope.event_id, kind = %envelope.kind))]
    pub async fn apply(&self, envelope: &EventEnvelope) -> Result<ApplyOutcome> {
        let change = ProjectionChange::for_kind(envelope.kind);
        let start = Instant::now();
        let outcome = self.store.apply_event(envelope, &change).await?;
        self.metrics
            .observe_histogram(metric_names::APPLY_LATENCY, start.elapsed().as_secs_f64())
            .await;

        match outcome {
            ApplyOutcome::Applied => {
                self.metrics.inc_counter(metric_names::EVENTS_APPLIED).await;
                debug!(subject_id = %envelope.subject_id, "event applied to replica");
                if let Some(cache) = &self.cache {
                    cache.invalidate_subject(envelope.subject_id).await;
                }
            }
            ApplyOutcome::DuplicateSkipped => {
                self.metrics
                    .inc_counter(metric_names::DUPLICATES_SKIPPED)
                    .await;
                debug!(subject_id = %envelope.subject_id, "duplicate event skipped");
            }
            ApplyOutcome::Gap => {
                self.metrics
                    .inc_counter(metric_names::PROJECTION_GAPS)
                    .await;
                warn!(
                    subject_id = %envelope.subject_id,
                    actor_id = %envelope.actor_id,
                    "removal without prior projection, counters left untouched"
                );
            }
        }

        Ok(outcome)
    }
}
