//! Facades over the two sides of the pipeline.
//!
//! [`EngagementService`] is the write-side entry point: ledger transaction
//! first, then best-effort cache patch and post-commit emit.
//! [`ReplicaQueryService`] is the read-side entry point: look-aside cache
//! over the projected aggregate store.

mod read;
mod write;

pub use read::ReplicaQueryService;
pub use write::{EngagementService, SubjectDetail};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::cache::MediaPayload;
use crate::domain::SubjectId;
use crate::Result;

/// Source of truth for subject media, fronted by the media cache namespace.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn load_media(&self, subject_id: SubjectId) -> Result<Option<MediaPayload>>;
}
