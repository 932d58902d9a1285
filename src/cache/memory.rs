//! In-memory cache backend with LRU eviction and per-entry TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Result;

use super::CacheBackend;

const DEFAULT_MAX_ENTRIES: usize = 10_000;

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
    last_accessed: Instant,
}

/// Backend statistics
#[derive(Default)]
pub struct BackendStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl BackendStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Process-local [`CacheBackend`]. Entries carry their own deadline; the
/// least recently accessed entry is evicted when the map is full.
pub struct InMemoryCacheBackend {
    max_entries: usize,
    entries: RwLock<HashMap<String, CacheEntry>>,
    stats: BackendStats,
}

impl InMemoryCacheBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: RwLock::new(HashMap::new()),
            stats: BackendStats::default(),
        }
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry past its deadline.
    pub async fn cleanup_expired(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();

        for key in expired {
            entries.remove(&key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn evict_oldest(&self, entries: &mut HashMap<String, CacheEntry>) {
        if let Some(oldest_key) = entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone())
        {
            entries.remove(&oldest_key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get_mut(key) {
            if entry.expires_at <= Instant::now() {
                entries.remove(key);
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }

            entry.last_accessed = Instant::now();
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(entry.value.clone()));
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;

        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            self.evict_oldest(&mut entries);
        }

        let now = Instant::now();
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_get_set_delete() {
        let backend = InMemoryCacheBackend::new(10);

        backend
            .set("k1", b"v1".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get("k1").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(backend.get("k2").await.unwrap(), None);

        backend.delete("k1").await.unwrap();
        assert_eq!(backend.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_per_entry_ttl() {
        let backend = InMemoryCacheBackend::new(10);

        backend
            .set("short", b"v".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();
        backend
            .set("long", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(backend.get("short").await.unwrap(), None);
        assert!(backend.get("long").await.unwrap().is_some());
        assert_eq!(backend.stats().expirations(), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let backend = InMemoryCacheBackend::new(3);
        let ttl = Duration::from_secs(60);

        backend.set("a", b"1".to_vec(), ttl).await.unwrap();
        backend.set("b", b"2".to_vec(), ttl).await.unwrap();
        backend.set("c", b"3".to_vec(), ttl).await.unwrap();

        // touch "a" so "b" is the least recently used
        backend.get("a").await.unwrap();
        backend.set("d", b"4".to_vec(), ttl).await.unwrap();

        assert!(backend.get("a").await.unwrap().is_some());
        assert_eq!(backend.get("b").await.unwrap(), None);
        assert!(backend.get("c").await.unwrap().is_some());
        assert!(backend.get("d").await.unwrap().is_some());
        assert_eq!(backend.stats().evictions(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let backend = InMemoryCacheBackend::new(10);

        backend
            .set("a", b"1".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        backend
            .set("b", b"2".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        backend.cleanup_expired().await;

        assert_eq!(backend.len().await, 1);
        assert_eq!(backend.stats().expirations(), 1);
    }
}
