//! Session lifecycle on top of a [`SessionStore`].

use std::result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

mod key;
use crate::store::{self, SessionMap, SessionRecord, SessionStore};
pub use key::{KeyGenerator, ParseError, SESSION_KEY_LEN, SessionKey};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] store::Error),
    /// A forced create hit a key that is already taken. The stored record was
    /// left untouched.
    #[error("a session with the generated key already exists")]
    DuplicateKey,
    #[error("session has not been initialized")]
    UnInitialized,
}

type Result<T> = result::Result<T, Error>;

/// Hands out [`Session`]s bound to one shared store.
///
/// Build it once at startup with the store and the server secret, then call
/// [`SessionManager::session`] for every request.
///
/// ```rust
/// use dynamo_sessions::SessionManager;
/// use dynamo_sessions::store::memory::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), dynamo_sessions::Error> {
/// let manager = SessionManager::new(Arc::new(MemoryStore::new()), "server-secret");
///
/// let session = manager.session(None);
/// session.insert("user_id", &42_u64).await?;
/// session.save(false).await?;
///
/// let key = session.key().unwrap();
/// let again = manager.session(Some(key.as_str()));
/// assert_eq!(again.get::<u64>("user_id").await?, Some(42));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SessionManager<S: SessionStore> {
    store: Arc<S>,
    keys: KeyGenerator,
}

impl<S: SessionStore> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            keys: self.keys.clone(),
        }
    }
}

impl<S: SessionStore> SessionManager<S> {
    pub fn new(store: Arc<S>, secret: impl AsRef<[u8]>) -> Self {
        Self {
            store,
            keys: KeyGenerator::new(secret),
        }
    }

    /// Opens the session identified by `session_key`, typically the value of
    /// the session cookie.
    ///
    /// Nothing is read until the session is first accessed. A key that fails
    /// validation is dropped, so the session behaves as if none was given.
    pub fn session(&self, session_key: Option<&str>) -> Session<S> {
        let session_key = session_key.and_then(|raw| {
            raw.parse::<SessionKey>()
                .map_err(|err| {
                    tracing::warn!(
                        err = %err,
                        "possibly suspicious activity: malformed session key"
                    )
                })
                .ok()
        });

        Session::new(Arc::new(Inner {
            key: RwLock::new(session_key),
            data: RwLock::new(None),
            modified: AtomicBool::new(false),
            accessed: AtomicBool::new(false),
            store: Arc::clone(&self.store),
            keys: self.keys.clone(),
        }))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

/// The working state of one client's session.
///
/// Holds the session key (unset until the session is first persisted), the
/// decoded session data (loaded lazily), and the modified/accessed flags the
/// surrounding framework uses to decide whether to save.
///
/// Cloning is cheap and clones share state.
#[derive(Debug)]
pub struct Session<S: SessionStore> {
    inner: Arc<Inner<S>>,
}

impl<S: SessionStore> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Session<S>
where
    S: SessionStore,
{
    fn new(inner: Arc<Inner<S>>) -> Self {
        Self { inner }
    }

    /// Returns the session key, if one is assigned.
    pub fn key(&self) -> Option<SessionKey> {
        self.inner.key.read().clone()
    }

    /// `true` once the session data or key changed and needs saving.
    pub fn is_modified(&self) -> bool {
        self.inner.modified.load(Ordering::Relaxed)
    }

    /// `true` once the session data has been read or written.
    pub fn was_accessed(&self) -> bool {
        self.inner.accessed.load(Ordering::Relaxed)
    }

    /// Loads the session data for the current key.
    ///
    /// When there is no key, or no record is stored under it, a brand new
    /// session is created and an empty map returned; absence is never reported
    /// to the caller. Only store failures are returned as errors.
    #[tracing::instrument(name = "loading session from store", skip(self))]
    pub async fn load(&self) -> Result<SessionMap> {
        let Some(session_key) = self.key() else {
            self.create().await?;
            return Ok(SessionMap::default());
        };

        let record = self.inner.store.get(&session_key).await;
        let map = match record {
            Ok(Some(record)) => SessionMap::decode(&record.data).unwrap_or_else(|err| {
                tracing::warn!(err = %err, "session data could not be decoded, starting empty");
                SessionMap::default()
            }),
            Ok(None) => {
                tracing::debug!("no session record found, creating a new session");
                self.create().await?;
                return Ok(SessionMap::default());
            }
            Err(store::Error::MalformedRecord(reason)) => {
                tracing::warn!(reason = %reason, "malformed session record, starting empty");
                SessionMap::default()
            }
            Err(err) => {
                tracing::error!(err = %err, "failed to load session from store");
                return Err(err.into());
            }
        };

        *self.inner.data.write() = Some(map.clone());
        Ok(map)
    }

    /// Checks whether a session record is stored under `session_key`.
    ///
    /// Malformed keys are reported as missing.
    #[tracing::instrument(name = "checking session existence", skip_all)]
    pub async fn exists(&self, session_key: &str) -> Result<bool> {
        let Ok(session_key) = session_key.parse::<SessionKey>() else {
            tracing::warn!("possibly suspicious activity: malformed session key");
            return Ok(false);
        };

        self.inner.store.exists(&session_key).await.map_err(|err| {
            tracing::error!(err = %err, "failed to check session existence");
            err.into()
        })
    }

    /// Creates a new, empty session under a freshly generated key.
    ///
    /// Candidate keys are inserted with a create-only-if-absent write until one
    /// is accepted; a collision simply draws another key.
    #[tracing::instrument(name = "creating session", skip(self))]
    pub async fn create(&self) -> Result<()> {
        *self.inner.data.write() = Some(SessionMap::default());
        self.save_new().await
    }

    /// Persists the session data.
    ///
    /// With `force_create`, a fresh key is generated and the data is written
    /// only if that key is unused; otherwise [`Error::DuplicateKey`] is
    /// returned and nothing is retried. Without it, the data of the existing
    /// record is replaced in place, keeping its creation time. A session that
    /// has no key yet is created first.
    #[tracing::instrument(name = "saving session to store", skip(self))]
    pub async fn save(&self, force_create: bool) -> Result<()> {
        if force_create {
            return self.insert_new().await;
        }

        // loading may replace a stale key, so read the key afterwards
        let map = self.loaded().await?;
        let Some(session_key) = self.key() else {
            return self.save_new().await;
        };

        let data = map.encode()?;
        self.inner
            .store
            .update(&session_key, &data, store::now())
            .await
            .map_err(|err| {
                tracing::error!(err = %err, "failed to save session to store");
                err
            })?;

        Ok(())
    }

    /// Deletes the record of `session_key`, or of the current session when
    /// `None`. Without any key this does nothing, and deleting a missing
    /// record succeeds.
    #[tracing::instrument(name = "deleting session from store", skip_all)]
    pub async fn delete(&self, session_key: Option<&str>) -> Result<()> {
        let session_key = match session_key {
            Some(raw) => match raw.parse::<SessionKey>() {
                Ok(session_key) => session_key,
                Err(err) => {
                    tracing::warn!(err = %err, "possibly suspicious activity: malformed session key");
                    return Ok(());
                }
            },
            None => match self.key() {
                Some(session_key) => session_key,
                None => return Ok(()),
            },
        };

        self.inner.store.delete(&session_key).await.map_err(|err| {
            tracing::error!(err = %err, "failed to delete session from store");
            err.into()
        })
    }

    /// Retrieves a value from the session data.
    #[tracing::instrument(name = "getting value from session", skip(self))]
    pub async fn get<T>(&self, field: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let map = self.loaded().await?;
        Ok(map.get(field)?)
    }

    /// Sets a value in the session data. Nothing is written to the store until
    /// [`Session::save`].
    ///
    /// Returns `true` if the stored value changed.
    #[tracing::instrument(name = "setting value in session", skip(self, value))]
    pub async fn insert<T>(&self, field: &str, value: &T) -> Result<bool>
    where
        T: Serialize,
    {
        self.loaded().await?;
        let changed = match self.inner.data.write().as_mut() {
            Some(map) => map.insert(field, value)?,
            None => return Err(Error::UnInitialized),
        };

        if changed {
            self.changed();
        }
        Ok(changed)
    }

    /// Removes a value from the session data.
    ///
    /// Returns `true` if the field existed.
    #[tracing::instrument(name = "removing value from session", skip(self))]
    pub async fn remove(&self, field: &str) -> Result<bool> {
        self.loaded().await?;
        let removed = self
            .inner
            .data
            .write()
            .as_mut()
            .is_some_and(|map| map.remove(field));

        if removed {
            self.changed();
        }
        Ok(removed)
    }

    /// Returns the field names present in the session data.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let map = self.loaded().await?;
        Ok(map.keys().map(str::to_owned).collect())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.loaded().await?.is_empty())
    }

    /// Empties the session data without touching the store.
    pub fn clear(&self) {
        *self.inner.data.write() = Some(SessionMap::default());
        self.inner.accessed.store(true, Ordering::Relaxed);
        self.changed();
    }

    /// Moves the session data to a new key and deletes the old record.
    ///
    /// Use after a privilege change, such as logging in, to prevent session
    /// fixation.
    #[tracing::instrument(name = "cycling the session key", skip(self))]
    pub async fn cycle_key(&self) -> Result<SessionKey> {
        let map = self.loaded().await?;
        let old_key = self.key();

        self.create().await?;
        *self.inner.data.write() = Some(map);
        self.save(false).await?;

        if let Some(old_key) = old_key {
            self.inner.store.delete(&old_key).await.map_err(|err| {
                tracing::error!(err = %err, "failed to delete the previous session");
                err
            })?;
        }

        self.key().ok_or(Error::UnInitialized)
    }

    /// Empties the session, deletes its record and forgets the key.
    #[tracing::instrument(name = "flushing session", skip(self))]
    pub async fn flush(&self) -> Result<()> {
        self.clear();
        self.delete(None).await?;
        *self.inner.key.write() = None;
        Ok(())
    }

    /// Returns the session data, loading it first if needed.
    ///
    /// A session without a key starts empty and is not created here; that
    /// happens on the first save.
    async fn loaded(&self) -> Result<SessionMap> {
        self.inner.accessed.store(true, Ordering::Relaxed);

        if let Some(map) = self.inner.data.read().as_ref() {
            return Ok(map.clone());
        }

        if self.key().is_none() {
            let mut data = self.inner.data.write();
            return Ok(data.get_or_insert_with(SessionMap::default).clone());
        }

        self.load().await
    }

    /// Retries [`Session::insert_new`] until a generated key is accepted.
    async fn save_new(&self) -> Result<()> {
        loop {
            match self.insert_new().await {
                Ok(()) => return Ok(()),
                Err(Error::DuplicateKey) => {
                    tracing::debug!("generated session key already taken, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Writes the current data under a newly generated key, only if that key is
    /// unused. The session adopts the key on success.
    async fn insert_new(&self) -> Result<()> {
        let map = self.inner.data.read().clone().unwrap_or_default();
        let session_key = self.inner.keys.generate();
        let record = SessionRecord::new(session_key.clone(), map.encode()?, store::now());

        match self.inner.store.insert(&record).await {
            Ok(()) => {
                // the working data may have changed while the write was in flight
                *self.inner.key.write() = Some(session_key);
                self.changed();
                Ok(())
            }
            Err(store::Error::DuplicateKey) => Err(Error::DuplicateKey),
            Err(err) => {
                tracing::error!(err = %err, "failed to insert session into store");
                Err(err.into())
            }
        }
    }

    fn changed(&self) {
        self.inner.modified.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Inner<S: SessionStore> {
    key: RwLock<Option<SessionKey>>,
    // `None` until the data is loaded or first written
    data: RwLock<Option<SessionMap>>,
    // set when the data or the key changes
    modified: AtomicBool,
    // set when the data is read or written
    accessed: AtomicBool,
    store: Arc<S>,
    keys: KeyGenerator,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn manager() -> SessionManager<MemoryStore> {
        SessionManager::new(Arc::new(MemoryStore::new()), "test-secret")
    }

    #[tokio::test]
    async fn test_malformed_cookie_is_dropped() {
        let session = manager().session(Some("<script>alert(1)</script>"));
        assert!(session.key().is_none());
    }

    #[tokio::test]
    async fn test_lazy_access_without_key_does_not_create() {
        let manager = manager();
        let session = manager.session(None);

        assert_eq!(session.get::<String>("name").await.unwrap(), None);
        assert!(session.key().is_none());
        assert!(session.was_accessed());
        assert!(!session.is_modified());
        assert!(manager.store().is_empty());
    }

    #[tokio::test]
    async fn test_insert_marks_modified_only_on_change() {
        let session = manager().session(None);

        assert!(session.insert("n", &1_u8).await.unwrap());
        assert!(session.is_modified());
        assert!(!session.insert("n", &1_u8).await.unwrap());
        assert!(session.remove("n").await.unwrap());
        assert!(!session.remove("n").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_record_loads_empty() {
        let manager = manager();
        let key = KeyGenerator::new("other").generate();
        manager
            .store()
            .insert(&SessionRecord::new(key.clone(), vec![0xff; 8], 1))
            .await
            .unwrap();

        let session = manager.session(Some(key.as_str()));
        assert!(session.load().await.unwrap().is_empty());
        assert_eq!(session.key(), Some(key));
    }

    #[tokio::test]
    async fn test_flush_forgets_everything() {
        let manager = manager();
        let session = manager.session(None);
        session.insert("n", &1_u8).await.unwrap();
        session.save(false).await.unwrap();
        let key = session.key().unwrap();

        session.flush().await.unwrap();

        assert!(session.key().is_none());
        assert!(session.is_empty().await.unwrap());
        assert!(!session.exists(key.as_str()).await.unwrap());
    }
}
