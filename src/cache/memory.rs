use super::CacheBackend;
use crate::core::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 1024;

/// In-process hash cache; each hash keeps at most `capacity` entries,
/// evicting the least recently used.
pub struct MemoryCache {
    hashes: Mutex<HashMap<String, LruCache<String, String>>>,
    capacity: NonZeroUsize,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            hashes: Mutex::new(HashMap::new()),
            capacity: NonZeroUsize::new(capacity)
                .or(NonZeroUsize::new(DEFAULT_CAPACITY))
                .unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub fn len(&self, hash: &str) -> usize {
        self.hashes
            .lock()
            .map(|hashes| hashes.get(hash).map_or(0, LruCache::len))
            .unwrap_or(0)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>> {
        let mut hashes = self.hashes.lock()?;
        Ok(hashes
            .get_mut(hash)
            .and_then(|entries| entries.get(field).cloned()))
    }

    async fn hset(&self, hash: &str, field: &str, payload: String) -> Result<()> {
        let mut hashes = self.hashes.lock()?;
        hashes
            .entry(hash.to_string())
            .or_insert_with(|| LruCache::new(self.capacity))
            .put(field.to_string(), payload);
        Ok(())
    }

    async fn hdel(&self, hash: &str, field: &str) -> Result<bool> {
        let mut hashes = self.hashes.lock()?;
        Ok(hashes
            .get_mut(hash)
            .and_then(|entries| entries.pop(field))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashes_are_isolated() {
        let cache = MemoryCache::new(8);
        cache.hset("User", "1", "a".into()).await.unwrap();
        cache.hset("Post", "1", "b".into()).await.unwrap();

        assert_eq!(cache.hget("User", "1").await.unwrap().as_deref(), Some("a"));
        assert_eq!(cache.hget("Post", "1").await.unwrap().as_deref(), Some("b"));
        assert!(cache.hdel("User", "1").await.unwrap());
        assert!(!cache.hdel("User", "1").await.unwrap());
        assert_eq!(cache.hget("Post", "1").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let cache = MemoryCache::new(2);
        cache.hset("User", "1", "a".into()).await.unwrap();
        cache.hset("User", "2", "b".into()).await.unwrap();
        cache.hget("User", "1").await.unwrap();
        cache.hset("User", "3", "c".into()).await.unwrap();

        assert_eq!(cache.len("User"), 2);
        assert_eq!(cache.hget("User", "2").await.unwrap(), None);
        assert!(cache.hget("User", "1").await.unwrap().is_some());
    }
}
