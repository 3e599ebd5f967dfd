//! Session store implementations

mod backend;
mod cache_store;
mod memory;
mod scan;
mod traits;

pub use backend::{CacheBackend, CacheConnection, Lookup, ScanPage};
pub use cache_store::{CacheStore, MemoryStore};
pub use memory::{MemoryBackend, MemoryConnection, DEFAULT_SCAN_PAGE_SIZE};
pub use scan::{escape_glob, KeyScan};
pub use traits::SessionStore;

#[cfg(feature = "redis-store")]
mod redis_store;

#[cfg(feature = "redis-store")]
pub use redis_store::{
    keys_from_scan_reply, lookup_from_reply, redacted_url, RedisBackend, RedisConnection, RedisStore,
};
