//! # kv-session-store
//!
//! Session persistence behind a small, pluggable store contract, with a
//! Redis-backed implementation.
//!
//! The contract ([`SessionStore`]) has four operations: `find`, `save`,
//! `delete` and `delete_by_pattern`. Tokens and payloads are opaque to the
//! store; generating tokens and encoding session data is the caller's job.
//!
//! ## Features
//!
//! - **Atomic upsert with expiry**: payload and absolute expiry are written together
//! - **Absence is not an error**: unknown, expired or malformed sessions come back as `Ok(None)`
//! - **Non-blocking bulk deletion**: cursor scan plus `UNLINK`, confined to the store's key prefix
//! - **Pluggable backends**: Redis via `deadpool-redis`, an in-memory backend, or your own [`CacheBackend`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chrono::{Duration, Utc};
//! use kv_session_store::{RedisConfig, RedisStore, SessionStore, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kv_session_store::StoreError> {
//!     let store = RedisStore::connect(
//!         &RedisConfig::new("redis://127.0.0.1:6379"),
//!         StoreConfig::default().with_prefix("myapp:session:"),
//!     )
//!     .await?;
//!
//!     store.save("tok1", b"data", Utc::now() + Duration::minutes(1)).await?;
//!     assert_eq!(store.find("tok1").await?, Some(b"data".to_vec()));
//!
//!     store.delete_by_pattern("tok").await?;
//!     assert_eq!(store.find("tok1").await?, None);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod store;
pub mod timestamp;

pub use config::{RedisConfig, StoreConfig};
pub use error::StoreError;
pub use store::{
    CacheBackend, CacheConnection, CacheStore, KeyScan, Lookup, MemoryBackend, MemoryStore,
    ScanPage, SessionStore,
};

#[cfg(feature = "redis-store")]
pub use store::{RedisBackend, RedisStore};
