use crate::SessionKey;
use crate::cache::SessionCache;
use crate::store::Error;
use fred::clients::Pool;
use fred::interfaces::KeysInterface;
use fred::types::Expiration;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

impl From<fred::error::Error> for Error {
    fn from(err: fred::error::Error) -> Self {
        Error::Cache(err.to_string())
    }
}

/// A Redis-backed session cache.
///
/// Every entry is a plain string key holding the encoded record, written with
/// `SET .. EX` so Redis enforces the freshness window on its own.
#[derive(Clone, Debug)]
pub struct RedisCache<C: KeysInterface + Clone + Send + Sync = Pool> {
    client: Arc<C>,
    prefix: String,
}

impl<C> RedisCache<C>
where
    C: KeysInterface + Clone + Send + Sync,
{
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            prefix: "dynamo_sessions:".to_string(),
        }
    }

    /// Sets the prefix prepended to every session key. Defaults to "dynamo_sessions:".
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn cache_key(&self, key: &SessionKey) -> String {
        format!("{}{}", self.prefix, key)
    }
}

/// Redis rejects a zero expiry, and one whose deadline overflows its clock.
/// TTLs past that point are written without expiry.
fn expiration(ttl: Duration) -> Option<Expiration> {
    const MAX_EXPIRE_SECONDS: u64 = 60 * 60 * 24 * 365 * 1000;

    let seconds = ttl.as_secs().max(1);
    if seconds > MAX_EXPIRE_SECONDS {
        return None;
    }
    i64::try_from(seconds).ok().map(Expiration::EX)
}

impl<C> SessionCache for RedisCache<C>
where
    C: KeysInterface + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &SessionKey) -> Result<Option<Vec<u8>>, Error> {
        Ok(self
            .client
            .get::<Option<Vec<u8>>, _>(self.cache_key(key))
            .await?)
    }

    async fn set(&self, key: &SessionKey, value: &[u8], ttl: Duration) -> Result<(), Error> {
        let _: () = self
            .client
            .set(
                self.cache_key(key),
                value.to_vec(),
                expiration(ttl),
                None,
                false,
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), Error> {
        let _: i64 = self.client.del(self.cache_key(key)).await?;
        Ok(())
    }
}
