//! Store error types

use thiserror::Error;

/// Errors surfaced by session store operations.
///
/// A missing, expired or malformed session is never an error: those cases
/// are reported as `Ok(None)` by [`SessionStore::find`](crate::SessionStore::find).
/// Every variant here means the backend itself could not be trusted to answer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not hand out a connection
    #[error("Session backend unavailable: {0}")]
    Unavailable(String),

    /// A backend command failed
    #[error("Session backend command failed: {0}")]
    Command(String),

    /// Redis error (when redis-store feature is enabled)
    #[cfg(feature = "redis-store")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Connection could not be checked out of the pool
    #[cfg(feature = "redis-store")]
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Connection pool could not be built from its configuration
    #[cfg(feature = "redis-store")]
    #[error("Failed to create Redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),
}
