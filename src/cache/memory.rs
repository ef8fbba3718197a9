use crate::SessionKey;
use crate::cache::SessionCache;
use crate::store::Error;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedValue {
    data: Vec<u8>,
    // `None` when the TTL is too large to represent
    expires_at: Option<Instant>,
}

impl CachedValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires| expires > now)
    }
}

/// An in-process cache backed by a concurrent hash map.
///
/// Entries are dropped lazily once their TTL has passed.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<SessionKey, CachedValue>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of entries, including ones that expired but were not evicted yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SessionCache for MemoryCache {
    async fn get(&self, key: &SessionKey) -> Result<Option<Vec<u8>>, Error> {
        let now = Instant::now();
        if let Some(value) = self.entries.get(key) {
            if value.is_live(now) {
                return Ok(Some(value.data.clone()));
            }
        }

        self.entries.remove_if(key, |_, value| !value.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &SessionKey, value: &[u8], ttl: Duration) -> Result<(), Error> {
        self.entries.insert(
            key.clone(),
            CachedValue {
                data: value.to_vec(),
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyGenerator;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        let key = KeyGenerator::new("test").generate();

        assert_eq!(cache.get(&key).await.unwrap(), None);

        cache.set(&key, b"value", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(b"value".to_vec()));

        cache.delete(&key).await.unwrap();
        cache.delete(&key).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let cache = MemoryCache::new();
        let key = KeyGenerator::new("test").generate();

        cache
            .set(&key, b"value", Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        let key = KeyGenerator::new("test").generate();

        cache.set(&key, b"value", Duration::from_secs(1)).await.unwrap();
        sleep(Duration::from_secs(2)).await;

        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert!(cache.is_empty());
    }
}
