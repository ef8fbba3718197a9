use crate::SessionKey;
use crate::store::{Error, SessionRecord, SessionStore};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct StoredRecord {
    data: Vec<u8>,
    created: i64,
    expires_at: Option<Instant>,
}

impl StoredRecord {
    fn is_live(&self) -> bool {
        self.expires_at
            .map(|expires| expires > Instant::now())
            .unwrap_or(true)
    }
}

/// An in-memory session store implementation.
///
/// Inserts are atomic per key, so it honours the same create-if-absent
/// contract as [`DynamoStore`](crate::store::dynamodb::DynamoStore). An
/// optional lifetime stands in for store-side TTL expiry.
///
/// ### Note
///
/// Do not use this in a production environment.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<SessionKey, StoredRecord>,
    lifetime: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            lifetime: None,
        }
    }

    /// Expires records `lifetime` after their last write.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.cleanup_expired();
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expires_at(&self) -> Option<Instant> {
        self.lifetime
            .and_then(|lifetime| Instant::now().checked_add(lifetime))
    }

    fn cleanup_expired(&self) {
        self.records.retain(|_, record| record.is_live());
    }
}

impl SessionStore for MemoryStore {
    async fn get(&self, session_key: &SessionKey) -> Result<Option<SessionRecord>, Error> {
        Ok(self
            .records
            .get(session_key)
            .filter(|record| record.is_live())
            .map(|record| {
                SessionRecord::new(session_key.clone(), record.data.clone(), record.created)
            }))
    }

    async fn exists(&self, session_key: &SessionKey) -> Result<bool, Error> {
        Ok(self
            .records
            .get(session_key)
            .is_some_and(|record| record.is_live()))
    }

    async fn insert(&self, record: &SessionRecord) -> Result<(), Error> {
        let stored = StoredRecord {
            data: record.data.clone(),
            created: record.created,
            expires_at: self.expires_at(),
        };

        match self.records.entry(record.session_key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live() {
                    return Err(Error::DuplicateKey);
                }
                entry.insert(stored);
            }
            Entry::Vacant(entry) => {
                entry.insert(stored);
            }
        }

        Ok(())
    }

    async fn update(
        &self,
        session_key: &SessionKey,
        data: &[u8],
        created: i64,
    ) -> Result<SessionRecord, Error> {
        let expires_at = self.expires_at();

        let stored = match self.records.entry(session_key.clone()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if !record.is_live() {
                    record.created = created;
                }
                record.data = data.to_vec();
                record.expires_at = expires_at;
                record.clone()
            }
            Entry::Vacant(entry) => entry
                .insert(StoredRecord {
                    data: data.to_vec(),
                    created,
                    expires_at,
                })
                .clone(),
        };

        Ok(SessionRecord::new(
            session_key.clone(),
            stored.data,
            stored.created,
        ))
    }

    async fn delete(&self, session_key: &SessionKey) -> Result<(), Error> {
        self.records.remove(session_key);
        Ok(())
    }
}
