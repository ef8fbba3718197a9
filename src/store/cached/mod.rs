use crate::SessionKey;
use crate::cache::SessionCache;
use crate::config::SessionConfig;
use crate::store::{Error, SessionRecord, SessionStore, deserialize_value, serialize_value};
use std::time::Duration;

/// [`CachedStore`], a composite store that places a fast cache (in-process or
/// Redis) in front of the persistent store holding the session records.
///
/// ## Core Strategies
///
/// - **Cache-Aside Reads**: `get` and `exists` check the cache first. On a hit
///   the store is not contacted. On a miss the store is queried and a found
///   record is written to the cache.
///
/// - **Write-Through**: `insert` and `update` write to the store first and,
///   once that succeeds, replace the cache entry with the record as stored.
///   If the cache cannot be refreshed the entry is dropped instead, so a
///   successful write never leaves a stale entry behind.
///
/// - **Invalidate on Delete**: `delete` removes the record from the store and
///   then unconditionally removes the cache entry.
///
/// Cache entries live for a bounded TTL (five minutes by default). A record
/// deleted by another process, or expired by the store, can therefore only be
/// served from the cache until its entry runs out.
///
/// ## Example
///
/// ```rust
/// use dynamo_sessions::cache::memory::MemoryCache;
/// use dynamo_sessions::store::cached::CachedStore;
/// use dynamo_sessions::store::memory::MemoryStore;
/// use std::time::Duration;
///
/// let store = CachedStore::new(MemoryStore::new(), MemoryCache::new())
///     .with_ttl(Duration::from_secs(60));
/// ```
#[derive(Clone, Debug)]
pub struct CachedStore<S, C>
where
    S: SessionStore,
    C: SessionCache,
{
    store: S,
    cache: C,
    ttl: Duration,
}

impl<S, C> CachedStore<S, C>
where
    S: SessionStore,
    C: SessionCache,
{
    /// Creates a new `CachedStore`.
    ///
    /// # Arguments
    ///
    /// * `store` - The persistent source of truth (e.g., `DynamoStore`).
    /// * `cache` - The cache in front of it (e.g., `RedisCache`).
    pub fn new(store: S, cache: C) -> Self {
        Self {
            store,
            cache,
            ttl: Duration::from_secs(300),
        }
    }

    /// Creates a `CachedStore` using the cache TTL from `config`
    /// (`DYNAMODB_SESSIONS_CACHE_TTL_SECONDS`).
    pub fn from_config(store: S, cache: C, config: &SessionConfig) -> Self {
        Self::new(store, cache).with_ttl(config.cache_ttl())
    }

    /// Sets how long an entry may be served from the cache.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    async fn cached(&self, session_key: &SessionKey) -> Option<SessionRecord> {
        let bytes = match self.cache.get(session_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!("session cache miss");
                return None;
            }
            Err(err) => {
                tracing::warn!(err = %err, "session cache read failed, falling back to store");
                return None;
            }
        };

        match deserialize_value::<SessionRecord>(&bytes) {
            Ok(record) if &record.session_key == session_key => {
                tracing::debug!("session cache hit");
                Some(record)
            }
            Ok(_) => {
                tracing::warn!("cached session record does not match its key, ignoring");
                None
            }
            Err(err) => {
                tracing::warn!(err = %err, "cached session record could not be decoded, ignoring");
                None
            }
        }
    }

    /// Writes `record` to the cache, dropping the entry if that fails.
    async fn write_through(&self, record: &SessionRecord) -> Result<(), Error> {
        let written = match serialize_value(record) {
            Ok(bytes) => self.cache.set(&record.session_key, &bytes, self.ttl).await,
            Err(err) => Err(err),
        };

        if let Err(err) = written {
            tracing::warn!(err = %err, "failed to refresh session cache, invalidating entry");
            self.cache.delete(&record.session_key).await.map_err(|err| {
                tracing::error!(err = %err, "failed to invalidate stale session cache entry");
                err
            })?;
        }

        Ok(())
    }
}

impl<S, C> SessionStore for CachedStore<S, C>
where
    S: SessionStore,
    C: SessionCache,
{
    async fn get(&self, session_key: &SessionKey) -> Result<Option<SessionRecord>, Error> {
        if let Some(record) = self.cached(session_key).await {
            return Ok(Some(record));
        }

        let record = self.store.get(session_key).await?;
        if let Some(record) = &record {
            if let Err(err) = self.write_through(record).await {
                tracing::warn!(err = %err, "failed to warm session cache");
            }
        }

        Ok(record)
    }

    async fn exists(&self, session_key: &SessionKey) -> Result<bool, Error> {
        if self.cached(session_key).await.is_some() {
            return Ok(true);
        }

        self.store.exists(session_key).await
    }

    async fn insert(&self, record: &SessionRecord) -> Result<(), Error> {
        self.store.insert(record).await?;
        self.write_through(record).await
    }

    async fn update(
        &self,
        session_key: &SessionKey,
        data: &[u8],
        created: i64,
    ) -> Result<SessionRecord, Error> {
        let record = self.store.update(session_key, data, created).await?;
        self.write_through(&record).await?;
        Ok(record)
    }

    async fn delete(&self, session_key: &SessionKey) -> Result<(), Error> {
        self.store.delete(session_key).await?;
        self.cache.delete(session_key).await
    }
}
