pub mod cached;
#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod memory;

use crate::SessionKey;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::future::Future;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("a session with this key already exists")]
    DuplicateKey,

    #[error("Encoding failed with: {0}")]
    Encode(String),

    #[error("Decoding failed with: {0}")]
    Decode(String),

    #[error("store request timed out: {0}")]
    Timeout(String),

    #[error("store request failed: {0}")]
    Transport(String),

    #[error("malformed session record: {0}")]
    MalformedRecord(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("invalid store configuration: {0}")]
    Config(String),
}

#[cfg(feature = "bincode")]
pub(crate) fn serialize_value<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| Error::Encode(e.to_string()))
}

#[cfg(feature = "bincode")]
pub(crate) fn deserialize_value<T: DeserializeOwned>(value: &[u8]) -> Result<T, Error> {
    bincode::serde::decode_from_slice(value, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| Error::Decode(e.to_string()))
}

#[cfg(all(feature = "messagepack", not(feature = "bincode")))]
pub(crate) fn serialize_value<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    rmp_serde::to_vec(value).map_err(|e| Error::Encode(e.to_string()))
}

#[cfg(all(feature = "messagepack", not(feature = "bincode")))]
pub(crate) fn deserialize_value<T: DeserializeOwned>(value: &[u8]) -> Result<T, Error> {
    rmp_serde::from_slice(value).map_err(|e| Error::Decode(e.to_string()))
}

/// Which read guarantee to request from the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// Reads always reflect the latest successful write.
    #[default]
    Strong,
    /// Reads may be served by a lagging replica.
    Eventual,
}

impl Consistency {
    pub fn is_strong(self) -> bool {
        self == Consistency::Strong
    }
}

/// A persisted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_key: SessionKey,
    /// The encoded [`SessionMap`].
    pub data: Vec<u8>,
    /// Unix seconds; written by the insert that created the record and never after.
    pub created: i64,
}

impl SessionRecord {
    pub fn new(session_key: SessionKey, data: Vec<u8>, created: i64) -> Self {
        Self {
            session_key,
            data,
            created,
        }
    }
}

/// The decoded contents of a session: field names mapped to encoded values.
///
/// Values are encoded individually so that a field can be read back as any type
/// compatible with what was written, without decoding the rest of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionMap(HashMap<String, Vec<u8>>);

impl SessionMap {
    pub fn new(inner: HashMap<String, Vec<u8>>) -> Self {
        Self(inner)
    }

    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, Error> {
        self.0
            .get(field)
            .map(|value| deserialize_value(value))
            .transpose()
    }

    pub fn get_raw(&self, field: &str) -> Option<&[u8]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Sets `field` to `value`. Returns `true` if the stored bytes changed.
    pub fn insert<T: Serialize>(&mut self, field: &str, value: &T) -> Result<bool, Error> {
        let encoded = serialize_value(value)?;
        let previous = self.0.insert(field.to_owned(), encoded);
        Ok(previous.as_deref() != self.0.get(field).map(Vec::as_slice))
    }

    pub fn remove(&mut self, field: &str) -> bool {
        self.0.remove(field).is_some()
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Encodes the whole map into the blob stored in [`SessionRecord::data`].
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        serialize_value(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        deserialize_value(data)
    }
}

/// Record-level access to the table holding session records.
///
/// Absence is `Ok(None)`/`Ok(false)`, never an error. Implementations must make
/// [`SessionStore::insert`] atomic: it succeeds only if no record with the key
/// exists at the moment of the write.
pub trait SessionStore: Send + Sync + 'static {
    /// Fetches the record stored at `session_key`.
    fn get(
        &self,
        session_key: &SessionKey,
    ) -> impl Future<Output = Result<Option<SessionRecord>, Error>> + Send;

    /// Returns `true` if a record is stored at `session_key`.
    fn exists(&self, session_key: &SessionKey) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Writes `record` only if its key is not taken.
    ///
    /// Returns [`Error::DuplicateKey`] and leaves the existing record untouched
    /// otherwise.
    fn insert(&self, record: &SessionRecord) -> impl Future<Output = Result<(), Error>> + Send;

    /// Replaces the `data` of the record at `session_key`, creating it if it is
    /// missing. `created` is only written when the record has none.
    ///
    /// Returns the record as stored after the write.
    fn update(
        &self,
        session_key: &SessionKey,
        data: &[u8],
        created: i64,
    ) -> impl Future<Output = Result<SessionRecord, Error>> + Send;

    /// Deletes the record at `session_key`. Deleting a missing record succeeds.
    fn delete(&self, session_key: &SessionKey) -> impl Future<Output = Result<(), Error>> + Send;
}

pub(crate) fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Cart {
        items: Vec<String>,
        total: u32,
    }

    #[test]
    fn session_map_typed_access() {
        let mut map = SessionMap::default();
        let cart = Cart {
            items: vec!["book".into()],
            total: 12,
        };

        assert!(map.insert("cart", &cart).unwrap());
        assert!(!map.insert("cart", &cart).unwrap());
        assert_eq!(map.get::<Cart>("cart").unwrap(), Some(cart));
        assert_eq!(map.get::<Cart>("missing").unwrap(), None);

        assert!(map.remove("cart"));
        assert!(!map.remove("cart"));
        assert!(map.is_empty());
    }

    #[test]
    fn session_map_blob_decodes_to_equal_map() {
        let mut map = SessionMap::default();
        map.insert("user_id", &42_u64).unwrap();
        map.insert("theme", &"dark").unwrap();

        let decoded = SessionMap::decode(&map.encode().unwrap()).unwrap();
        assert_eq!(decoded, map);
        assert_eq!(decoded.get::<u64>("user_id").unwrap(), Some(42));
    }

    #[test]
    fn garbage_blob_is_a_decode_error() {
        let err = SessionMap::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
