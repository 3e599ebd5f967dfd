//! Key-value cache backend seam
//!
//! [`CacheStore`](super::CacheStore) talks to its backend only through these
//! traits. A backend is a pool; each store operation checks out one
//! [`CacheConnection`], uses it exclusively for its command sequence, and
//! returns it by dropping it.

use async_trait::async_trait;

use crate::error::StoreError;

/// Outcome of a single-key lookup, before it crosses into the store contract
///
/// This is the one place where a backend's "no such key" signal is told
/// apart from a failure.
#[derive(Debug)]
pub enum Lookup {
    /// Key present and unexpired
    Found(Vec<u8>),
    /// Key absent, expired, or holding something that is not a payload
    Absent,
    /// Backend or connectivity failure
    Failed(StoreError),
}

impl Lookup {
    /// Convert into the store contract's result shape
    pub fn into_result(self) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Lookup::Found(payload) => Ok(Some(payload)),
            Lookup::Absent => Ok(None),
            Lookup::Failed(err) => Err(err),
        }
    }

    /// Whether the key held a payload
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// One page of an incremental key scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call; 0 once the pass over the keyspace is complete
    pub cursor: u64,
    /// Matching keys in this page (may be empty, may repeat earlier keys)
    pub keys: Vec<String>,
}

/// A connection pool for a key-value cache
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// A checked-out connection, released when dropped
    type Connection: CacheConnection;

    /// Check a connection out of the pool
    async fn acquire(&self) -> Result<Self::Connection, StoreError>;
}

/// Commands the session store needs from a checked-out connection
#[async_trait]
pub trait CacheConnection: Send {
    /// GET a key
    async fn get(&mut self, key: &str) -> Lookup;

    /// Set value and absolute expiry (epoch milliseconds) as one atomic unit
    ///
    /// An expiry in the past must leave the key absent.
    async fn set_with_expiry(
        &mut self,
        key: &str,
        value: &[u8],
        expires_at_ms: i64,
    ) -> Result<(), StoreError>;

    /// Remove a key; absent keys are not an error
    async fn delete(&mut self, key: &str) -> Result<(), StoreError>;

    /// Remove a key without blocking the backend on reclaiming its value
    async fn unlink(&mut self, key: &str) -> Result<(), StoreError>;

    /// One incremental scan step over keys matching a glob `pattern`
    async fn scan(&mut self, cursor: u64, pattern: &str) -> Result<ScanPage, StoreError>;
}
