//! SQLite-backed authoritative ledger.
//!
//! Counter adjustments are single-row `UPDATE ... MAX(0, ...)` statements
//! executed in the same transaction as the interaction-record mutation, so
//! concurrent workers never need application-level locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{ActorId, InteractionKind, SubjectAggregate, SubjectId};
use crate::{ReplicationError, Result};

use super::{InteractionLedger, ToggleOutcome, Transition};

/// SQLite implementation of the write-side ledger.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and apply the ledger schema.
    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(url).await?;
        crate::migrations::run_ledger(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Shared body of `like()`/`dislike()`: resolve the transition under the
    /// row transaction, mutate the record, and adjust both counters clamped
    /// at zero.
    async fn toggle(
        &self,
        subject_id: SubjectId,
        actor_id: ActorId,
        requested: InteractionKind,
    ) -> Result<ToggleOutcome> {
        let mut tx = self.pool.begin().await?;

        let enabled: Option<(i64,)> =
            sqlx::query_as("SELECT enabled FROM subjects WHERE subject_id = ?")
                .bind(subject_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        match enabled {
            Some((1,)) => {}
            _ => return Err(ReplicationError::SubjectNotFound(subject_id)),
        }

        let current: Option<(String,)> = sqlx::query_as(
            "SELECT kind FROM interaction_records WHERE subject_id = ? AND actor_id = ?",
        )
        .bind(subject_id.to_string())
        .bind(actor_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let current = current
            .map(|(kind,)| {
                InteractionKind::parse(&kind).ok_or_else(|| {
                    ReplicationError::Internal(format!("invalid interaction kind: {kind}"))
                })
            })
            .transpose()?;

        let transition = Transition::resolve(current, requested);
        let occurred_at = Utc::now();

        match transition.resulting_state() {
            Some(kind) => {
                sqlx::query(
                    r#"
                    INSERT INTO interaction_records (subject_id, actor_id, kind, occurred_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(subject_id, actor_id)
                    DO UPDATE SET kind = excluded.kind, occurred_at = excluded.occurred_at
                    "#,
                )
                .bind(subject_id.to_string())
                .bind(actor_id.to_string())
                .bind(kind.as_str())
                .bind(occurred_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    "DELETE FROM interaction_records WHERE subject_id = ? AND actor_id = ?",
                )
                .bind(subject_id.to_string())
                .bind(actor_id.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        let (like_delta, dislike_delta) = transition.counter_deltas();
        sqlx::query(
            r#"
            UPDATE subjects
            SET like_count = MAX(0, like_count + ?),
                dislike_count = MAX(0, dislike_count + ?)
            WHERE subject_id = ?
            "#,
        )
        .bind(like_delta)
        .bind(dislike_delta)
        .bind(subject_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            subject_id = %subject_id,
            actor_id = %actor_id,
            transition = ?transition,
            "ledger toggle committed"
        );

        Ok(ToggleOutcome {
            transition,
            occurred_at,
        })
    }

    /// Increment one monotonic counter after the enabled guard.
    async fn bump_monotonic(
        &self,
        subject_id: SubjectId,
        counter: MonotonicCounter,
    ) -> Result<DateTime<Utc>> {
        let occurred_at = Utc::now();
        let result = sqlx::query(counter.update_sql())
            .bind(subject_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ReplicationError::SubjectNotFound(subject_id));
        }
        Ok(occurred_at)
    }
}

/// Counters that only ever move up on the write side.
#[derive(Debug, Clone, Copy)]
enum MonotonicCounter {
    Comment,
    Share,
}

impl MonotonicCounter {
    fn update_sql(self) -> &'static str {
        match self {
            MonotonicCounter::Comment => {
                "UPDATE subjects SET comment_count = comment_count + 1 \
                 WHERE subject_id = ? AND enabled = 1"
            }
            MonotonicCounter::Share => {
                "UPDATE subjects SET share_count = share_count + 1 \
                 WHERE subject_id = ? AND enabled = 1"
            }
        }
    }
}

#[async_trait]
impl InteractionLedger for SqliteLedger {
    #[instrument(skip(self), fields(subject_id = %subject_id))]
    async fn create_subject(&self, subject_id: SubjectId) -> Result<SubjectAggregate> {
        let created_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO subjects (subject_id, enabled, created_at)
            VALUES (?, 1, ?)
            ON CONFLICT(subject_id) DO NOTHING
            "#,
        )
        .bind(subject_id.to_string())
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.aggregate(subject_id)
            .await?
            .ok_or_else(|| ReplicationError::SubjectNotFound(subject_id))
    }

    #[instrument(skip(self), fields(subject_id = %subject_id))]
    async fn delete_subject(&self, subject_id: SubjectId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM interaction_records WHERE subject_id = ?")
            .bind(subject_id.to_string())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM subjects WHERE subject_id = ?")
            .bind(subject_id.to_string())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ReplicationError::SubjectNotFound(subject_id));
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(subject_id = %subject_id, enabled))]
    async fn set_enabled(&self, subject_id: SubjectId, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE subjects SET enabled = ? WHERE subject_id = ?")
            .bind(enabled as i64)
            .bind(subject_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ReplicationError::SubjectNotFound(subject_id));
        }
        Ok(())
    }

    async fn like(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<ToggleOutcome> {
        self.toggle(subject_id, actor_id, InteractionKind::Like)
            .await
    }

    async fn dislike(&self, subject_id: SubjectId, actor_id: ActorId) -> Result<ToggleOutcome> {
        self.toggle(subject_id, actor_id, InteractionKind::Dislike)
            .await
    }

    async fn comment(&self, subject_id: SubjectId, _actor_id: ActorId) -> Result<DateTime<Utc>> {
        self.bump_monotonic(subject_id, MonotonicCounter::Comment)
            .await
    }

    async fn share(&self, subject_id: SubjectId, _actor_id: ActorId) -> Result<DateTime<Utc>> {
        self.bump_monotonic(subject_id, MonotonicCounter::Share)
            .await
    }

    async fn aggregate(&self, subject_id: SubjectId) -> Result<Option<SubjectAggregate>> {
        let row: Option<SubjectRow> = sqlx::query_as(
            r#"
            SELECT subject_id, enabled, like_count, dislike_count,
                   comment_count, share_count, created_at
            FROM subjects WHERE subject_id = ?
            "#,
        )
        .bind(subject_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubjectAggregate::try_from).transpose()
    }

    async fn interaction(
        &self,
        subject_id: SubjectId,
        actor_id: ActorId,
    ) -> Result<Option<InteractionKind>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT kind FROM interaction_records WHERE subject_id = ? AND actor_id = ?",
        )
        .bind(subject_id.to_string())
        .bind(actor_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(kind,)| {
            InteractionKind::parse(&kind).ok_or_else(|| {
                ReplicationError::Internal(format!("invalid interaction kind: {kind}"))
            })
        })
        .transpose()
    }
}

/// Raw row from the subjects table
#[derive(Debug, FromRow)]
struct SubjectRow {
    subject_id: String,
    enabled: i64,
    like_count: i64,
    dislike_count: i64,
    comment_count: i64,
    share_count: i64,
    created_at: String,
}

impl TryFrom<SubjectRow> for SubjectAggregate {
    type Error = ReplicationError;

    fn try_from(row: SubjectRow) -> Result<Self> {
        let subject_id = Uuid::parse_str(&row.subject_id)
            .map_err(|e| ReplicationError::Internal(format!("invalid subject_id: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| ReplicationError::Internal(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(SubjectAggregate {
            subject_id: SubjectId::from_uuid(subject_id),
            enabled: row.enabled != 0,
            like_count: row.like_count.max(0) as u64,
            dislike_count: row.dislike_count.max(0) as u64,
            comment_count: row.comment_count.max(0) as u64,
            share_count: row.share_count.max(0) as u64,
            created_at,
        })
    }
}
