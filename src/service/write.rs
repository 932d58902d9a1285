//! Write-side facade.
//!
//! Every mutation follows the same shape: commit to the ledger, then patch
//! or invalidate the write-side cache, then emit the event. The ledger
//! result is what the caller gets; the cache and the emit are best-effort
//! and can only make the replica stale, never the ledger wrong.

use std::sync::Arc;

use tracing::instrument;

use crate::cache::{LookAsideCache, MediaPayload};
use crate::domain::{ActorId, EventEnvelope, EventKind, SubjectAggregate, SubjectId};
use crate::ledger::{InteractionLedger, ToggleOutcome};
use crate::metrics::{metric_names, timed, MetricsRegistry};
use crate::outbox::OutboxEmitter;
use crate::{ReplicationError, Result};

use super::MediaSource;

/// Aggregate plus the calling viewer's own flags, which are never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectDetail {
    pub aggregate: SubjectAggregate,
    pub viewer_liked: bool,
    pub viewer_disliked: bool,
}

/// Write-side entry point composing ledger, cache, and outbox.
pub struct EngagementService {
    ledger: Arc<dyn InteractionLedger>,
    outbox: OutboxEmitter,
    cache: Arc<LookAsideCache>,
    media_source: Option<Arc<dyn MediaSource>>,
    metrics: Arc<MetricsRegistry>,
}

impl EngagementService {
    pub fn new(
        ledger: Arc<dyn InteractionLedger>,
        outbox: OutboxEmitter,
        cache: Arc<LookAsideCache>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            ledger,
            outbox,
            cache,
            media_source: None,
            metrics,
        }
    }

    pub fn with_media_source(mut self, media_source: Arc<dyn MediaSource>) -> Self {
        self.media_source = Some(media_source);
        self
    }

    #[instrument(skip(self), fields(subject_id = %subject_id))]
    pub async fn create_subject(
        &self,
        subject_id: SubjectId,
        actor_id: ActorId,
    ) -> Result<SubjectAggregate> {
        let aggregate = self.ledger_write(self.ledger.create_subject(subject_id)).await?;
        self.cache.invalidate_subject(subject_id).await;
        self.outbox
            .emit(&EventEnvelope::new(subject_id, actor_id, EventKind::Created))
            .await;
        Ok(aggregate)
    }

    #[instrument(skip(self), fields(subject_id = %subject_id))]
    pub async fn delete_subject(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<()> {
        self.ledger_write(self.ledger.delete_subject(subject_id)).await?;
        self.cache.invalidate_subject(subject_id).await;
        self.outbox
            .emit(&EventEnvelope::new(subject_id, actor_id, EventKind::Deleted))
            .await;
        Ok(())
    }

    #[instrument(skip(self), fields(subject_id = %subject_id, enabled))]
    pub async fn set_enabled(
        &self,
        subject_id: SubjectId,
        actor_id: ActorId,
        enabled: bool,
    ) -> Result<()> {
        self.ledger_write(self.ledger.set_enabled(subject_id, enabled))
            .await?;
        self.cache.invalidate_subject(subject_id).await;
        let kind = if enabled {
            EventKind::Enabled
        } else {
            EventKind::Disabled
        };
        self.outbox
            .emit(&EventEnvelope::new(subject_id, actor_id, kind))
            .await;
        Ok(())
    }

    /// Toggle a like. Returns the committed transition.
    #[instrument(skip(self), fields(subject_id = %subject_id, actor_id = %actor_id))]
    pub async fn like(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<ToggleOutcome> {
        let outcome = self.ledger_write(self.ledger.like(subject_id, actor_id)).await?;
        self.finish_toggle(subject_id, actor_id, &outcome).await;
        Ok(outcome)
    }

    /// Toggle a dislike. Returns the committed transition.
    #[instrument(skip(self), fields(subject_id = %subject_id, actor_id = %actor_id))]
    pub async fn dislike(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<ToggleOutcome> {
        let outcome = self
            .ledger_write(self.ledger.dislike(subject_id, actor_id))
            .await?;
        self.finish_toggle(subject_id, actor_id, &outcome).await;
        Ok(outcome)
    }

    #[instrument(skip(self), fields(subject_id = %subject_id, actor_id = %actor_id))]
    pub async fn comment(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<()> {
        let occurred_at = self
            .ledger_write(self.ledger.comment(subject_id, actor_id))
            .await?;
        self.cache
            .patch_subject(subject_id, |a| a.comment_count += 1)
            .await;
        self.outbox
            .emit(&EventEnvelope {
                occurred_at,
                ..EventEnvelope::new(subject_id, actor_id, EventKind::Commented)
            })
            .await;
        Ok(())
    }

    #[instrument(skip(self), fields(subject_id = %subject_id, actor_id = %actor_id))]
    pub async fn share(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<()> {
        let occurred_at = self
            .ledger_write(self.ledger.share(subject_id, actor_id))
            .await?;
        self.cache
            .patch_subject(subject_id, |a| a.share_count += 1)
            .await;
        self.outbox
            .emit(&EventEnvelope {
                occurred_at,
                ..EventEnvelope::new(subject_id, actor_id, EventKind::Shared)
            })
            .await;
        Ok(())
    }

    /// Aggregate for a subject with the viewer's own flags overlaid. The
    /// aggregate rides the cache; the per-viewer flags always come from the
    /// ledger.
    pub async fn subject_detail(
        &self,
        subject_id: SubjectId,
        viewer: ActorId,
    ) -> Result<SubjectDetail> {
        let aggregate = match self.cache.get_subject(subject_id).await {
            Some(aggregate) => aggregate,
            None => {
                let aggregate = self
                    .ledger
                    .aggregate(subject_id)
                    .await?
                    .ok_or(ReplicationError::SubjectNotFound(subject_id))?;
                self.cache.put_subject(&aggregate).await;
                aggregate
            }
        };

        let interaction = self.ledger.interaction(subject_id, viewer).await?;
        Ok(SubjectDetail {
            aggregate,
            viewer_liked: interaction == Some(crate::domain::InteractionKind::Like),
            viewer_disliked: interaction == Some(crate::domain::InteractionKind::Dislike),
        })
    }

    /// Media through the cache; `Ok(None)` when no source is configured or
    /// the subject has no media.
    pub async fn media(&self, subject_id: SubjectId) -> Result<Option<MediaPayload>> {
        if let Some(payload) = self.cache.get_media(subject_id).await {
            return Ok(Some(payload));
        }

        let source = match &self.media_source {
            Some(source) => source,
            None => return Ok(None),
        };

        let payload = source.load_media(subject_id).await?;
        if let Some(payload) = &payload {
            self.cache.put_media(subject_id, payload).await;
        }
        Ok(payload)
    }

    async fn ledger_write<T>(
        &self,
        op: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let result = timed(&self.metrics, metric_names::LEDGER_LATENCY, op).await;
        if result.is_ok() {
            self.metrics.inc_counter(metric_names::LEDGER_WRITES).await;
        }
        result
    }

    async fn finish_toggle(
        &self,
        subject_id: SubjectId,
        actor_id: ActorId,
        outcome: &ToggleOutcome,
    ) {
        let (like_delta, dislike_delta) = outcome.transition.counter_deltas();
        self.cache
            .patch_subject(subject_id, |a| {
                a.like_count = add_clamped(a.like_count, like_delta);
                a.dislike_count = add_clamped(a.dislike_count, dislike_delta);
            })
            .await;
        self.outbox.emit(&outcome.envelope(subject_id, actor_id)).await;
    }
}

fn add_clamped(current: u64, delta: i64) -> u64 {
    if delta >= 0 {
        current.saturating_add(delta as u64)
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}
