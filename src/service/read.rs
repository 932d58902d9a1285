//! Replica-side query facade.

use std::sync::Arc;

use crate::cache::LookAsideCache;
use crate::domain::{ActorId, ActorProjection, SubjectAggregate, SubjectId};
use crate::store::AggregateStore;
use crate::Result;

/// Look-aside reads over the projected store.
pub struct ReplicaQueryService {
    store: Arc<dyn AggregateStore>,
    cache: Arc<LookAsideCache>,
}

impl ReplicaQueryService {
    pub fn new(store: Arc<dyn AggregateStore>, cache: Arc<LookAsideCache>) -> Self {
        Self { store, cache }
    }

    /// Replica aggregate: cache first, store on miss, repopulate on hit.
    /// A cache failure degrades to a store read, never to an error.
    pub async fn subject(&self, subject_id: SubjectId) -> Result<Option<SubjectAggregate>> {
        if let Some(aggregate) = self.cache.get_subject(subject_id).await {
            return Ok(Some(aggregate));
        }

        let aggregate = self.store.aggregate(subject_id).await?;
        if let Some(aggregate) = &aggregate {
            self.cache.put_subject(aggregate).await;
        }
        Ok(aggregate)
    }

    /// Per-actor flags straight from the store; these are never cached.
    pub async fn projection(
        &self,
        subject_id: SubjectId,
        actor_id: ActorId,
    ) -> Result<Option<ActorProjection>> {
        self.store.projection(subject_id, actor_id).await
    }
}
