//! Database migrations.
//!
//! Uses SQLx embedded migrations. The write-side ledger and the read-side
//! replica own disjoint schemas and, in deployment, disjoint databases.

use sqlx::SqlitePool;

use crate::{ReplicationError, Result};

static LEDGER_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/ledger");
static REPLICA_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/replica");

/// Apply the authoritative write-side schema.
pub async fn run_ledger(pool: &SqlitePool) -> Result<()> {
    LEDGER_MIGRATOR
        .run(pool)
        .await
        .map_err(|e| ReplicationError::Internal(e.to_string()))
}

/// Apply the denormalized replica schema.
pub async fn run_replica(pool: &SqlitePool) -> Result<()> {
    REPLICA_MIGRATOR
        .run(pool)
        .await
        .map_err(|e| ReplicationError::Internal(e.to_string()))
}
