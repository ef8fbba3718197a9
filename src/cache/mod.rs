//! Process-wide caches placed in front of a [`SessionStore`](crate::store::SessionStore).

pub mod memory;
#[cfg(feature = "redis-cache")]
pub mod redis;

use crate::SessionKey;
use crate::store::Error;
use std::future::Future;
use std::time::Duration;

/// A key-value cache of encoded session records.
///
/// Each operation must be atomic for its key. Nothing is required across keys.
pub trait SessionCache: Send + Sync + 'static {
    fn get(&self, key: &SessionKey) -> impl Future<Output = Result<Option<Vec<u8>>, Error>> + Send;

    /// Stores `value` under `key` for at most `ttl`.
    fn set(
        &self,
        key: &SessionKey,
        value: &[u8],
        ttl: Duration,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Removes `key`. Removing a missing key succeeds.
    fn delete(&self, key: &SessionKey) -> impl Future<Output = Result<(), Error>> + Send;
}
