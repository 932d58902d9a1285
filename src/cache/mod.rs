//! Look-aside cache in front of the replica.
//!
//! The cache is strictly an accelerator: every error or timeout is treated
//! as a miss and the caller falls through to the backing store. Entries use
//! sliding expiration (a hit re-arms the TTL) and the TTL itself scales with
//! subject popularity so hot subjects stay resident longer.
//!
//! Key namespaces: `subject_{id}` for aggregates, `subject_media_{id}` for
//! the media listing. Both are invalidated together.

mod memory;

pub use memory::InMemoryCacheBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::warn;

use crate::domain::{SubjectAggregate, SubjectId};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::Result;

/// Default bound on a single cache round trip.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(100);

/// Media bytes cached alongside a subject under its own key namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Raw byte-value cache contract with per-entry TTL.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// TTL that grows with popularity: `min(base + popularity seconds, max)`.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl TtlPolicy {
    pub fn ttl_for(&self, popularity: u64) -> Duration {
        (self.base + Duration::from_secs(popularity)).min(self.max)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(600),
            max: Duration::from_secs(180_000),
        }
    }
}

/// Typed look-aside front over a [`CacheBackend`].
pub struct LookAsideCache {
    backend: Arc<dyn CacheBackend>,
    policy: TtlPolicy,
    op_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl LookAsideCache {
    pub fn new(backend: Arc<dyn CacheBackend>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            backend,
            policy: TtlPolicy::default(),
            op_timeout: DEFAULT_OP_TIMEOUT,
            metrics,
        }
    }

    pub fn with_policy(mut self, policy: TtlPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn subject_key(subject_id: SubjectId) -> String {
        format!("subject_{subject_id}")
    }

    pub fn media_key(subject_id: SubjectId) -> String {
        format!("subject_media_{subject_id}")
    }

    /// Cached aggregate, or `None` on miss, error, or timeout. A hit re-arms
    /// the TTL at the subject's current popularity.
    pub async fn get_subject(&self, subject_id: SubjectId) -> Option<SubjectAggregate> {
        let key = Self::subject_key(subject_id);
        let aggregate: SubjectAggregate = match self.get_value(&key).await {
            Some(v) => v,
            None => return None,
        };

        let ttl = self.policy.ttl_for(aggregate.popularity());
        self.set_value(&key, &aggregate, ttl).await;
        Some(aggregate)
    }

    /// Store an aggregate with popularity-scaled TTL. Best-effort.
    pub async fn put_subject(&self, aggregate: &SubjectAggregate) {
        let key = Self::subject_key(aggregate.subject_id);
        let ttl = self.policy.ttl_for(aggregate.popularity());
        self.set_value(&key, aggregate, ttl).await;
    }

    /// Read-modify-write on a cached aggregate. A miss is left as a miss;
    /// the next read repopulates from the store.
    pub async fn patch_subject<F>(&self, subject_id: SubjectId, patch: F)
    where
        F: FnOnce(&mut SubjectAggregate),
    {
        let key = Self::subject_key(subject_id);
        let mut aggregate: SubjectAggregate = match self.get_value(&key).await {
            Some(v) => v,
            None => return,
        };

        patch(&mut aggregate);
        let ttl = self.policy.ttl_for(aggregate.popularity());
        self.set_value(&key, &aggregate, ttl).await;
    }

    /// Cached media payload with sliding base TTL.
    pub async fn get_media(&self, subject_id: SubjectId) -> Option<MediaPayload> {
        let key = Self::media_key(subject_id);
        let payload: MediaPayload = match self.get_value(&key).await {
            Some(v) => v,
            None => return None,
        };

        self.set_value(&key, &payload, self.policy.base).await;
        Some(payload)
    }

    pub async fn put_media(&self, subject_id: SubjectId, payload: &MediaPayload) {
        let key = Self::media_key(subject_id);
        self.set_value(&key, payload, self.policy.base).await;
    }

    /// Drop both namespaces for a subject.
    pub async fn invalidate_subject(&self, subject_id: SubjectId) {
        for key in [Self::subject_key(subject_id), Self::media_key(subject_id)] {
            match timeout(self.op_timeout, self.backend.delete(&key)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.metrics.inc_counter(metric_names::CACHE_ERRORS).await;
                    warn!(key, error = %e, "cache delete failed");
                }
                Err(_) => {
                    self.metrics.inc_counter(metric_names::CACHE_ERRORS).await;
                    warn!(key, "cache delete timed out");
                }
            }
        }
        self.metrics
            .inc_counter(metric_names::CACHE_INVALIDATIONS)
            .await;
    }

    async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match timeout(self.op_timeout, self.backend.get(key)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                self.metrics.inc_counter(metric_names::CACHE_MISSES).await;
                return None;
            }
            Ok(Err(e)) => {
                self.metrics.inc_counter(metric_names::CACHE_ERRORS).await;
                warn!(key, error = %e, "cache get failed, treating as miss");
                return None;
            }
            Err(_) => {
                self.metrics.inc_counter(metric_names::CACHE_ERRORS).await;
                warn!(key, "cache get timed out, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                self.metrics.inc_counter(metric_names::CACHE_HITS).await;
                Some(value)
            }
            Err(e) => {
                // A stale or corrupt entry is dropped so it cannot keep
                // poisoning reads.
                self.metrics.inc_counter(metric_names::CACHE_ERRORS).await;
                warn!(key, error = %e, "cache entry undecodable, dropping");
                let _ = timeout(self.op_timeout, self.backend.delete(key)).await;
                None
            }
        }
    }

    async fn set_value<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics.inc_counter(metric_names::CACHE_ERRORS).await;
                warn!(key, error = %e, "cache encode failed");
                return;
            }
        };

        match timeout(self.op_timeout, self.backend.set(key, bytes, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.inc_counter(metric_names::CACHE_ERRORS).await;
                warn!(key, error = %e, "cache set failed");
            }
            Err(_) => {
                self.metrics.inc_counter(metric_names::CACHE_ERRORS).await;
                warn!(key, "cache set timed out");
            }
        }
    }
}
