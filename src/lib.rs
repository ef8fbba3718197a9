//! # dynamo-sessions: server-side sessions persisted in DynamoDB
//!
//! `dynamo-sessions` stores web session data in an Amazon DynamoDB table, one
//! item per session, keyed by an opaque random session key. An optional cache
//! (in-process or Redis) can be placed in front of the table to serve reads
//! without a round trip.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dynamo_sessions::SessionManager;
//! use dynamo_sessions::config::SessionConfig;
//! use dynamo_sessions::store::dynamodb::DynamoStoreBuilder;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::from_env()?;
//!     let store = DynamoStoreBuilder::from_config(&config)
//!         .await
//!         .build()
//!         .await?;
//!
//!     let manager = SessionManager::new(Arc::new(store), &config.secret_key);
//!
//!     // A request without a session cookie.
//!     let session = manager.session(None);
//!     session.insert("user_id", &42_u64).await?;
//!     session.save(false).await?;
//!
//!     // Hand this to the client, e.g. as a cookie value.
//!     let key = session.key().unwrap();
//!
//!     // A later request carrying the cookie.
//!     let session = manager.session(Some(key.as_str()));
//!     let user_id: Option<u64> = session.get("user_id").await?;
//!     assert_eq!(user_id, Some(42));
//!     Ok(())
//! }
//! ```
//!
//! # Session Lifecycle
//!
//! ```rust,no_run
//! use dynamo_sessions::Session;
//! use dynamo_sessions::store::memory::MemoryStore;
//!
//! async fn handler(session: Session<MemoryStore>) -> Result<(), dynamo_sessions::Error> {
//! // Load the data, creating a fresh session if the key is unknown
//! let map = session.load().await?;
//!
//! // Check whether some other key is still live
//! let live = session.exists("0123456789abcdef0123456789abcdef").await?;
//!
//! // Create a fresh, empty session under a new key
//! session.create().await?;
//!
//! // Persist changes in place, or force a brand new record
//! session.save(false).await?;
//! session.save(true).await?;
//!
//! // Move the data to a new key after a privilege change
//! let new_key = session.cycle_key().await?;
//!
//! // Delete the current record
//! session.delete(None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Stores
//!
//! ## DynamoDB
//!
//! Requires the `dynamodb` feature (enabled by default). Every item carries the
//! session key, the encoded session data as a binary attribute and the creation
//! time in unix seconds. New sessions are written with a conditional put, so two
//! sessions can never share a key. Updates replace only the data and keep the
//! original creation time.
//!
//! ```rust,no_run
//! use dynamo_sessions::aws_sdk_dynamodb::Client;
//! use dynamo_sessions::store::Consistency;
//! use dynamo_sessions::store::dynamodb::DynamoStoreBuilder;
//! use std::time::Duration;
//!
//! # async fn run(client: Client) -> Result<(), dynamo_sessions::store::Error> {
//! let store = DynamoStoreBuilder::new(client)
//!     .table_name("sessions")
//!     .key_attribute("session_key")
//!     .consistency(Consistency::Strong)
//!     // Let DynamoDB's TTL feature reap abandoned sessions
//!     .expire_with("expires_at", Duration::from_secs(60 * 60 * 24 * 14))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cached
//!
//! [`CachedStore`](store::cached::CachedStore) wraps any store with a cache.
//! Reads try the cache first, writes go to the store and then to the cache,
//! deletes remove both. With the `redis-cache` feature the cache can be Redis.
//!
//! ```rust,no_run
//! use dynamo_sessions::cache::memory::MemoryCache;
//! use dynamo_sessions::store::cached::CachedStore;
//! use dynamo_sessions::store::memory::MemoryStore;
//! use std::time::Duration;
//!
//! let store = CachedStore::new(MemoryStore::new(), MemoryCache::new())
//!     .with_ttl(Duration::from_secs(300));
//! ```
//!
//! ## Serialization
//!
//! Session data is encoded with one of two backends:
//!
//! - [`bincode`](https://crates.io/crates/bincode) (default) - Fast, compact binary serialization.
//! - [`rmp-serde`](https://crates.io/crates/rmp-serde) (MessagePack) - Cross-language compatible serialization.
//!
//! ```toml
//! [dependencies]
//! dynamo-sessions = { version = "0.1", default-features = false, features = ["dynamodb", "messagepack"] }
//! ```

#[cfg(feature = "dynamodb")]
pub use aws_sdk_dynamodb;

#[cfg(feature = "redis-cache")]
pub use fred;

pub mod cache;
pub mod config;

mod session;
pub use session::*;

pub mod store;
