//! SQLite-backed replica store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, Sqlite, Transaction};
use uuid::Uuid;

use crate::domain::{ActorId, ActorProjection, EventEnvelope, SubjectAggregate, SubjectId};
use crate::projector::{ApplyOutcome, InteractionChange, ProjectionChange};
use crate::{ReplicationError, Result};

use super::AggregateStore;

/// SQLite implementation of the read-side store.
pub struct SqliteAggregateStore {
    pool: SqlitePool,
}

impl SqliteAggregateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and apply the replica schema.
    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(url).await?;
        crate::migrations::run_replica(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record the dedupe marker; a conflict means the event was applied
    /// before.
    async fn mark_applied(
        tx: &mut Transaction<'_, Sqlite>,
        envelope: &EventEnvelope,
    ) -> Result<()> {
        let marked = sqlx::query(
            r#"
            INSERT INTO applied_events (event_id, subject_id, applied_at)
            VALUES (?, ?, ?)
            ON CONFLICT(event_id) DO NOTHING
            "#,
        )
        .bind(envelope.event_id.to_string())
        .bind(envelope.subject_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut **tx)
        .await?;

        if marked.rows_affected() == 0 {
            return Err(ReplicationError::DuplicateEvent(envelope.event_id));
        }
        Ok(())
    }

    async fn apply_interaction(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        envelope: &EventEnvelope,
        change: &InteractionChange,
    ) -> Result<()> {
        let prior: Option<ProjectionRow> = sqlx::query_as(
            r#"
            SELECT subject_id, actor_id, liked, disliked, commented, shared,
                   last_interaction_at
            FROM actor_projections WHERE subject_id = ? AND actor_id = ?
            "#,
        )
        .bind(envelope.subject_id.to_string())
        .bind(envelope.actor_id.to_string())
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(required) = change.requires_prior {
            let satisfied = prior
                .as_ref()
                .map(|p| match required {
                    crate::domain::InteractionKind::Like => p.liked != 0,
                    crate::domain::InteractionKind::Dislike => p.disliked != 0,
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

        // The subject row may not exist yet when events arrive ahead of the
        // CREATE (distinct subjects hash to distinct partitions).
        sqlx::query(
            r#"
            INSERT INTO subject_aggregates (subject_id, created_at)
            VALUES (?, ?)
            ON CONFLICT(subject_id) DO NOTHING
            "#,
        )
        .bind(envelope.subject_id.to_string())
        .bind(envelope.occurred_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE subject_aggregates
            SET like_count    = MAX(0, like_count + ?),
                dislike_count = MAX(0, dislike_count + ?),
                comment_count = MAX(0, comment_count + ?),
                share_count   = MAX(0, share_count + ?)
            WHERE subject_id = ?
            "#,
        )
        .bind(change.like_delta)
        .bind(change.dislike_delta)
        .bind(change.comment_delta)
        .bind(change.share_delta)
        .bind(envelope.subject_id.to_string())
        .execute(&mut **tx)
        .await?;

        let mut projection = match prior {
            Some(row) => ActorProjection::try_from(row)?,
            None => ActorProjection::neutral(
                envelope.actor_id,
                envelope.subject_id,
                envelope.occurred_at,
            ),
        };
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

        sqlx::query(
            r#"
            INSERT INTO actor_projections
                (subject_id, actor_id, liked, disliked, commented, shared, last_interaction_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(subject_id, actor_id) DO UPDATE SET
                liked = excluded.liked,
                disliked = excluded.disliked,
                commented = excluded.commented,
                shared = excluded.shared,
                last_interaction_at = excluded.last_interaction_at
            "#,
        )
        .bind(envelope.subject_id.to_string())
        .bind(envelope.actor_id.to_string())
        .bind(projection.liked as i64)
        .bind(projection.disliked as i64)
        .bind(projection.commented as i64)
        .bind(projection.shared as i64)
        .bind(projection.last_interaction_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AggregateStore for SqliteAggregateStore {
    async fn apply_event(
        &self,
        envelope: &EventEnvelope,
        change: &ProjectionChange,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        // The marker insert doubles as the idempotency check. It commits
        // with the change, so a crash between the two cannot happen.
        match Self::mark_applied(&mut tx, envelope).await {
            Ok(()) => {}
            Err(ReplicationError::DuplicateEvent(_)) => {
                tx.rollback().await?;
                return Ok(ApplyOutcome::DuplicateSkipped);
            }
            Err(e) => return Err(e),
        }

        let outcome = match change {
            ProjectionChange::CreateSubject => {
                sqlx::query(
                    r#"
                    INSERT INTO subject_aggregates (subject_id, created_at)
                    VALUES (?, ?)
                    ON CONFLICT(subject_id) DO NOTHING
                    "#,
                )
                .bind(envelope.subject_id.to_string())
                .bind(envelope.occurred_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
                ApplyOutcome::Applied
            }
            ProjectionChange::DeleteSubject => {
                sqlx::query("DELETE FROM actor_projections WHERE subject_id = ?")
                    .bind(envelope.subject_id.to_string())
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM subject_aggregates WHERE subject_id = ?")
                    .bind(envelope.subject_id.to_string())
                    .execute(&mut *tx)
                    .await?;
                ApplyOutcome::Applied
            }
            ProjectionChange::SetEnabled(enabled) => {
                sqlx::query(
                    r#"
                    INSERT INTO subject_aggregates (subject_id, enabled, created_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(subject_id) DO UPDATE SET enabled = excluded.enabled
                    "#,
                )
                .bind(envelope.subject_id.to_string())
                .bind(*enabled as i64)
                .bind(envelope.occurred_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
                ApplyOutcome::Applied
            }
            ProjectionChange::Interaction(change) => {
                match self.apply_interaction(&mut tx, envelope, change).await {
                    Ok(()) => ApplyOutcome::Applied,
                    Err(ReplicationError::ProjectionGap { .. }) => ApplyOutcome::Gap,
                    Err(e) => return Err(e),
                }
            }
        };

        // A gap commits too: the marker stops redelivery from retrying a
        // removal that can never succeed.
        tx.commit().await?;
        Ok(outcome)
    }

    async fn aggregate(&self, subject_id: SubjectId) -> Result<Option<SubjectAggregate>> {
        let row: Option<AggregateRow> = sqlx::query_as(
            r#"
            SELECT subject_id, enabled, like_count, dislike_count,
                   comment_count, share_count, created_at
            FROM subject_aggregates WHERE subject_id = ?
            "#,
        )
        .bind(subject_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubjectAggregate::try_from).transpose()
    }

    async fn projection(
        &self,
        subject_id: SubjectId,
        actor_id: ActorId,
    ) -> Result<Option<ActorProjection>> {
        let row: Option<ProjectionRow> = sqlx::query_as(
            r#"
            SELECT subject_id, actor_id, liked, disliked, commented, shared,
                   last_interaction_at
            FROM actor_projections WHERE subject_id = ? AND actor_id = ?
            "#,
        )
        .bind(subject_id.to_string())
        .bind(actor_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ActorProjection::try_from).transpose()
    }
}

#[derive(Debug, FromRow)]
struct AggregateRow {
    subject_id: String,
    enabled: i64,
    like_count: i64,
    dislike_count: i64,
    comment_count: i64,
    share_count: i64,
    created_at: String,
}

impl TryFrom<AggregateRow> for SubjectAggregate {
    type Error = ReplicationError;

    fn try_from(row: AggregateRow) -> Result<Self> {
        Ok(SubjectAggregate {
            subject_id: parse_subject_id(&row.subject_id)?,
            enabled: row.enabled != 0,
            like_count: row.like_count.max(0) as u64,
            dislike_count: row.dislike_count.max(0) as u64,
            comment_count: row.comment_count.max(0) as u64,
            share_count: row.share_count.max(0) as u64,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProjectionRow {
    subject_id: String,
    actor_id: String,
    liked: i64,
    disliked: i64,
    commented: i64,
    shared: i64,
    last_interaction_at: String,
}

impl TryFrom<ProjectionRow> for ActorProjection {
    type Error = ReplicationError;

    fn try_from(row: ProjectionRow) -> Result<Self> {
        let actor_id = Uuid::parse_str(&row.actor_id)
            .map_err(|e| ReplicationError::Internal(format!("invalid actor_id: {e}")))?;
        Ok(ActorProjection {
            subject_id: parse_subject_id(&row.subject_id)?,
            actor_id: ActorId::from_uuid(actor_id),
            liked: row.liked != 0,
            disliked: row.disliked != 0,
            commented: row.commented != 0,
            shared: row.shared != 0,
            last_interaction_at: parse_timestamp(&row.last_interaction_at)?,
        })
    }
}

fn parse_subject_id(s: &str) -> Result<SubjectId> {
    Uuid::parse_str(s)
        .map(SubjectId::from_uuid)
        .map_err(|e| ReplicationError::Internal(format!("invalid subject_id: {e}")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ReplicationError::Internal(format!("invalid timestamp: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;

    async fn create_test_store() -> SqliteAggregateStore {
        SqliteAggregateStore::from_url("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn apply(
        store: &SqliteAggregateStore,
        envelope: &EventEnvelope,
    ) -> ApplyOutcome {
        store
            .apply_event(envelope, &ProjectionChange::for_kind(envelope.kind))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_like() {
        let store = create_test_store().await;
        let subject = SubjectId::new();
        let actor = ActorId::new();

        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Created)).await;
        let outcome = apply(&store, &EventEnvelope::new(subject, actor, EventKind::Liked)).await;
        assert_eq!(outcome, ApplyOutcome::Applied);

        let aggregate = store.aggregate(subject).await.unwrap().unwrap();
        assert_eq!(aggregate.like_count, 1);

        let projection = store.projection(subject, actor).await.unwrap().unwrap();
        assert!(projection.liked);
        assert!(!projection.disliked);
    }

    #[tokio::test]
    async fn test_duplicate_event_id_is_skipped() {
        let store = create_test_store().await;
        let subject = SubjectId::new();
        let actor = ActorId::new();

        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Created)).await;
        let like = EventEnvelope::new(subject, actor, EventKind::Liked);
        assert_eq!(apply(&store, &like).await, ApplyOutcome::Applied);
        assert_eq!(apply(&store, &like).await, ApplyOutcome::DuplicateSkipped);

        let aggregate = store.aggregate(subject).await.unwrap().unwrap();
        assert_eq!(aggregate.like_count, 1);
    }

    #[tokio::test]
    async fn test_removal_without_prior_is_a_gap() {
        let store = create_test_store().await;
        let subject = SubjectId::new();
        let actor = ActorId::new();

        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Created)).await;
        let removal = EventEnvelope::new(subject, actor, EventKind::LikeRemoved);
        assert_eq!(apply(&store, &removal).await, ApplyOutcome::Gap);

        // counters never go negative and the marker blocks redelivery
        let aggregate = store.aggregate(subject).await.unwrap().unwrap();
        assert_eq!(aggregate.like_count, 0);
        assert_eq!(apply(&store, &removal).await, ApplyOutcome::DuplicateSkipped);
    }

    #[tokio::test]
    async fn test_change_to_dislike_moves_both_counters() {
        let store = create_test_store().await;
        let subject = SubjectId::new();
        let actor = ActorId::new();

        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Created)).await;
        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Liked)).await;
        let outcome = apply(
            &store,
            &EventEnvelope::new(subject, actor, EventKind::ChangedToDislike),
        )
        .await;
        assert_eq!(outcome, ApplyOutcome::Applied);

        let aggregate = store.aggregate(subject).await.unwrap().unwrap();
        assert_eq!(aggregate.like_count, 0);
        assert_eq!(aggregate.dislike_count, 1);

        let projection = store.projection(subject, actor).await.unwrap().unwrap();
        assert!(!projection.liked);
        assert!(projection.disliked);
    }

    #[tokio::test]
    async fn test_interaction_ahead_of_create_seeds_the_row() {
        let store = create_test_store().await;
        let subject = SubjectId::new();
        let actor = ActorId::new();

        let outcome = apply(
            &store,
            &EventEnvelope::new(subject, actor, EventKind::Commented),
        )
        .await;
        assert_eq!(outcome, ApplyOutcome::Applied);

        let aggregate = store.aggregate(subject).await.unwrap().unwrap();
        assert_eq!(aggregate.comment_count, 1);
    }

    #[tokio::test]
    async fn test_delete_drops_aggregate_and_projections() {
        let store = create_test_store().await;
        let subject = SubjectId::new();
        let actor = ActorId::new();

        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Created)).await;
        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Liked)).await;
        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Deleted)).await;

        assert!(store.aggregate(subject).await.unwrap().is_none());
        assert!(store.projection(subject, actor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disable_flips_the_flag_only() {
        let store = create_test_store().await;
        let subject = SubjectId::new();
        let actor = ActorId::new();

        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Created)).await;
        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Liked)).await;
        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Disabled)).await;

        let aggregate = store.aggregate(subject).await.unwrap().unwrap();
        assert!(!aggregate.enabled);
        assert_eq!(aggregate.like_count, 1);

        apply(&store, &EventEnvelope::new(subject, actor, EventKind::Enabled)).await;
        assert!(store.aggregate(subject).await.unwrap().unwrap().enabled);
    }
}
