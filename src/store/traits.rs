//! Session store trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::StoreError;

/// Trait for session storage backends
///
/// Tokens and payloads are opaque: token generation and payload encoding
/// belong to the caller. Every implementation must keep "no such session"
/// and "the backend failed" strictly apart, so callers never mistake an
/// outage for a cache miss.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Find the payload for a session token
    ///
    /// Returns `Ok(None)` if the token is unknown, expired, or its stored
    /// value is malformed. `Err` is reserved for backend failures.
    async fn find(&self, token: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Save a session token with its payload and absolute expiry
    ///
    /// An existing token has both payload and expiry replaced in one
    /// atomic step.
    async fn save(&self, token: &str, payload: &[u8], expiry: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Delete a session token
    ///
    /// Deleting a token that does not exist is a no-op and returns `Ok(())`.
    async fn delete(&self, token: &str) -> Result<(), StoreError>;

    /// Delete every session whose token starts with `pattern`
    ///
    /// Returns `Ok(())` if nothing matches. Not all-or-nothing: on error,
    /// sessions removed so far stay removed.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    async fn find(&self, token: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).find(token).await
    }

    async fn save(
        &self,
        token: &str,
        payload: &[u8],
        expiry: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).save(token, payload, expiry).await
    }

    async fn delete(&self, token: &str) -> Result<(), StoreError> {
        (**self).delete(token).await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<(), StoreError> {
        (**self).delete_by_pattern(pattern).await
    }
}
