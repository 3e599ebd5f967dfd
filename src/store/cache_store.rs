//! Session store on top of a key-value cache backend
//!
//! Storage format:
//! - Key: `prefix + token` (default prefix: "scs:session:")
//! - Value: the caller's payload bytes, untouched
//! - Expiry: absolute, in epoch milliseconds, enforced by the backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::backend::{CacheBackend, CacheConnection};
use super::memory::MemoryBackend;
use super::scan::{escape_glob, KeyScan};
use super::SessionStore;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::timestamp::millisecond_timestamp;

/// Session store backed by a key-value cache
///
/// Generic over the backend so the same namespacing, expiry encoding and
/// bulk-deletion logic runs against Redis in production and against
/// [`MemoryBackend`] in development and tests.
pub struct CacheStore<B: CacheBackend> {
    backend: Arc<B>,
    config: StoreConfig,
}

/// Session store backed by the in-process [`MemoryBackend`]
pub type MemoryStore = CacheStore<MemoryBackend>;

impl<B: CacheBackend> CacheStore<B> {
    /// Create a store over `backend` with the given configuration
    pub fn new(backend: B, config: StoreConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
        }
    }

    /// Create a store over `backend` with the default prefix
    pub fn with_backend(backend: B) -> Self {
        Self::new(backend, StoreConfig::default())
    }

    /// The key prefix
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// The underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Make a storage key from a session token
    pub fn namespaced_key(&self, token: &str) -> String {
        format!("{}{}", self.config.prefix, token)
    }

    /// Scan match expression for tokens starting with `pattern`
    ///
    /// The prefix is matched literally; `pattern` keeps its glob meaning.
    fn match_expression(&self, pattern: &str) -> String {
        format!("{}{}*", escape_glob(&self.config.prefix), pattern)
    }

    /// Walk the whole scan, collecting distinct keys inside our namespace
    async fn collect_matching_keys(
        &self,
        conn: &mut B::Connection,
        pattern: &str,
    ) -> Result<BTreeSet<String>, StoreError> {
        let mut scan = KeyScan::new(self.match_expression(pattern));
        let mut keys = BTreeSet::new();

        while let Some(batch) = scan.next_batch(conn).await? {
            for key in batch {
                if key.starts_with(&self.config.prefix) {
                    keys.insert(key);
                } else {
                    tracing::warn!(pattern = %scan.pattern(), "scan returned a key outside the store prefix, skipping");
                }
            }
        }

        Ok(keys)
    }
}

impl MemoryStore {
    /// Create an in-memory store with the default prefix
    pub fn new_in_memory() -> Self {
        Self::with_backend(MemoryBackend::new())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl<B: CacheBackend> Clone for CacheStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

#[async_trait]
impl<B: CacheBackend> SessionStore for CacheStore<B> {
    async fn find(&self, token: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = self.namespaced_key(token);
        let mut conn = self.backend.acquire().await?;

        let found = conn.get(&key).await.into_result();
        match &found {
            Ok(Some(_)) => tracing::debug!("session lookup hit"),
            Ok(None) => tracing::debug!("session lookup miss"),
            Err(e) => tracing::warn!(error = %e, "session lookup failed"),
        }
        found
    }

    async fn save(
        &self,
        token: &str,
        payload: &[u8],
        expiry: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = self.namespaced_key(token);
        let expires_at_ms = millisecond_timestamp(&expiry);
        let mut conn = self.backend.acquire().await?;

        conn.set_with_expiry(&key, payload, expires_at_ms)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "failed to save session"))?;

        tracing::debug!(expires_at_ms, bytes = payload.len(), "session saved");
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<(), StoreError> {
        let key = self.namespaced_key(token);
        let mut conn = self.backend.acquire().await?;

        conn.delete(&key)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "failed to delete session"))
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<(), StoreError> {
        let mut conn = self.backend.acquire().await?;

        // The scan runs to completion before anything is removed, so a
        // failed scan removes nothing.
        let keys = self
            .collect_matching_keys(&mut conn, pattern)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, pattern, "session scan failed"))?;

        for (removed, key) in keys.iter().enumerate() {
            if let Err(e) = conn.unlink(key).await {
                tracing::warn!(error = %e, pattern, removed, "bulk session delete aborted");
                return Err(e);
            }
        }

        tracing::debug!(pattern, removed = keys.len(), "sessions deleted by pattern");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::{Lookup, ScanPage};
    use crate::store::memory::MemoryConnection;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    /// Backend that replays scripted scan pages and records every command
    #[derive(Default)]
    struct ScriptedBackend {
        pages: Mutex<VecDeque<Result<ScanPage, StoreError>>>,
        fail_unlink: Mutex<Option<String>>,
        log: Arc<Mutex<Vec<String>>>,
    }

    struct ScriptedConnection {
        backend: Arc<ScriptedBackend>,
    }

    #[async_trait]
    impl CacheBackend for Arc<ScriptedBackend> {
        type Connection = ScriptedConnection;

        async fn acquire(&self) -> Result<ScriptedConnection, StoreError> {
            Ok(ScriptedConnection {
                backend: Arc::clone(self),
            })
        }
    }

    #[async_trait]
    impl CacheConnection for ScriptedConnection {
        async fn get(&mut self, key: &str) -> Lookup {
            self.backend.log.lock().push(format!("GET {}", key));
            Lookup::Absent
        }

        async fn set_with_expiry(
            &mut self,
            key: &str,
            _value: &[u8],
            expires_at_ms: i64,
        ) -> Result<(), StoreError> {
            self.backend
                .log
                .lock()
                .push(format!("SET {} PXAT {}", key, expires_at_ms));
            Ok(())
        }

        async fn delete(&mut self, key: &str) -> Result<(), StoreError> {
            self.backend.log.lock().push(format!("DEL {}", key));
            Ok(())
        }

        async fn unlink(&mut self, key: &str) -> Result<(), StoreError> {
            if self.backend.fail_unlink.lock().as_deref() == Some(key) {
                return Err(StoreError::Command(format!("UNLINK {} refused", key)));
            }
            self.backend.log.lock().push(format!("UNLINK {}", key));
            Ok(())
        }

        async fn scan(&mut self, cursor: u64, pattern: &str) -> Result<ScanPage, StoreError> {
            self.backend
                .log
                .lock()
                .push(format!("SCAN {} MATCH {}", cursor, pattern));
            self.backend
                .pages
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(StoreError::Command("script exhausted".into())))
        }
    }

    fn page(cursor: u64, keys: &[&str]) -> Result<ScanPage, StoreError> {
        Ok(ScanPage {
            cursor,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        })
    }

    fn scripted(pages: Vec<Result<ScanPage, StoreError>>) -> Arc<ScriptedBackend> {
        Arc::new(ScriptedBackend {
            pages: Mutex::new(pages.into()),
            ..Default::default()
        })
    }

    #[test]
    fn test_keys_are_namespaced() {
        let store = MemoryStore::new_in_memory();
        assert_eq!(store.namespaced_key("abc"), "scs:session:abc");

        let store = MemoryStore::new(MemoryBackend::new(), StoreConfig::new().with_prefix("app*:"));
        assert_eq!(store.namespaced_key("abc"), "app*:abc");
        assert_eq!(store.match_expression("a_"), "app\\*:a_*");
    }

    #[tokio::test]
    async fn test_save_encodes_absolute_millis() {
        let backend = scripted(vec![]);
        let store = CacheStore::with_backend(Arc::clone(&backend));
        let expiry = DateTime::<Utc>::from_timestamp_millis(1_900_000_000_123).unwrap();

        assert_ok!(store.save("tok", b"data", expiry).await);
        assert_eq!(
            *backend.log.lock(),
            vec!["SET scs:session:tok PXAT 1900000000123".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_by_pattern_accumulates_every_page() {
        let backend = scripted(vec![
            page(5, &["scs:session:a_1"]),
            page(9, &[]),
            page(0, &["scs:session:a_2", "scs:session:a_1"]),
        ]);
        let store = CacheStore::with_backend(Arc::clone(&backend));

        assert_ok!(store.delete_by_pattern("a_").await);
        assert_eq!(
            *backend.log.lock(),
            vec![
                "SCAN 0 MATCH scs:session:a_*",
                "SCAN 5 MATCH scs:session:a_*",
                "SCAN 9 MATCH scs:session:a_*",
                "UNLINK scs:session:a_1",
                "UNLINK scs:session:a_2",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_by_pattern_skips_foreign_keys() {
        let backend = scripted(vec![page(0, &["other:a_1", "scs:session:a_1"])]);
        let store = CacheStore::with_backend(Arc::clone(&backend));

        assert_ok!(store.delete_by_pattern("a_").await);
        let log = backend.log.lock();
        assert!(log.contains(&"UNLINK scs:session:a_1".to_string()));
        assert!(!log.iter().any(|line| line.contains("other:a_1")));
    }

    #[tokio::test]
    async fn test_scan_failure_deletes_nothing() {
        let backend = scripted(vec![
            page(3, &["scs:session:a_1"]),
            Err(StoreError::Command("connection reset".into())),
        ]);
        let store = CacheStore::with_backend(Arc::clone(&backend));

        assert_err!(store.delete_by_pattern("a_").await);
        assert!(!backend.log.lock().iter().any(|line| line.starts_with("UNLINK")));
    }

    #[tokio::test]
    async fn test_unlink_failure_keeps_earlier_removals() {
        let backend = scripted(vec![page(
            0,
            &["scs:session:a_1", "scs:session:a_2", "scs:session:a_3"],
        )]);
        *backend.fail_unlink.lock() = Some("scs:session:a_2".to_string());
        let store = CacheStore::with_backend(Arc::clone(&backend));

        assert_err!(store.delete_by_pattern("a_").await);
        let unlinked: Vec<String> = backend
            .log
            .lock()
            .iter()
            .filter(|line| line.starts_with("UNLINK"))
            .cloned()
            .collect();
        assert_eq!(unlinked, vec!["UNLINK scs:session:a_1"]);
    }

    #[tokio::test]
    async fn test_failures_release_connections() {
        let store = MemoryStore::new_in_memory();
        let expiry = Utc::now() + chrono::Duration::minutes(1);

        assert_ok!(store.save("tok", b"data", expiry).await);
        let mut conn = store.backend().acquire().await.unwrap();
        assert_eq!(store.backend().checked_out(), 1);

        store.backend().set_available(false);
        assert!(matches!(conn.get("scs:session:tok").await, Lookup::Failed(_)));
        drop(conn);
        assert_err!(store.find("tok").await);
        assert_err!(store.delete_by_pattern("t").await);
        assert_eq!(store.backend().checked_out(), 0);

        store.backend().set_available(true);
        assert_eq!(assert_ok!(store.find("tok").await), Some(b"data".to_vec()));
        assert_eq!(store.backend().checked_out(), 0);
    }

    /// Memory backend whose keyspace changes before every scan step after the first
    struct ChurningBackend {
        inner: MemoryBackend,
        scans: Arc<AtomicUsize>,
    }

    struct ChurningConnection {
        conn: MemoryConnection,
        side: MemoryConnection,
        raw: MemoryBackend,
        scans: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CacheBackend for ChurningBackend {
        type Connection = ChurningConnection;

        async fn acquire(&self) -> Result<ChurningConnection, StoreError> {
            Ok(ChurningConnection {
                conn: self.inner.acquire().await?,
                side: self.inner.acquire().await?,
                raw: self.inner.clone(),
                scans: Arc::clone(&self.scans),
            })
        }
    }

    #[async_trait]
    impl CacheConnection for ChurningConnection {
        async fn get(&mut self, key: &str) -> Lookup {
            self.conn.get(key).await
        }

        async fn set_with_expiry(
            &mut self,
            key: &str,
            value: &[u8],
            expires_at_ms: i64,
        ) -> Result<(), StoreError> {
            self.conn.set_with_expiry(key, value, expires_at_ms).await
        }

        async fn delete(&mut self, key: &str) -> Result<(), StoreError> {
            self.conn.delete(key).await
        }

        async fn unlink(&mut self, key: &str) -> Result<(), StoreError> {
            self.conn.unlink(key).await
        }

        async fn scan(&mut self, cursor: u64, pattern: &str) -> Result<ScanPage, StoreError> {
            let step = self.scans.fetch_add(1, Ordering::SeqCst);
            if step > 0 {
                // removals sort before the cursor, inserts land on both sides of it
                self.side.delete(&format!("aaa:{}", step)).await?;
                self.side.delete(&format!("scs:session:a_{}", 100 + step)).await?;
                self.raw.insert_raw(format!("scs:session:a_late_{}", step), b"late");
                self.raw.insert_raw(format!("scs:session:b_{}", step), b"other session");
                self.raw.insert_raw(format!("zzz:{}", step), b"foreign");
            }
            self.conn.scan(cursor, pattern).await
        }
    }

    #[tokio::test]
    async fn test_delete_by_pattern_over_changing_keyspace() {
        let raw = MemoryBackend::with_scan_page_size(3);
        for i in 0..20 {
            raw.insert_raw(format!("aaa:{}", i), b"foreign");
        }
        raw.insert_raw("zzz:keep", b"foreign");
        let scans = Arc::new(AtomicUsize::new(0));
        let store = CacheStore::with_backend(ChurningBackend {
            inner: raw.clone(),
            scans: Arc::clone(&scans),
        });
        let expiry = Utc::now() + chrono::Duration::minutes(1);

        for i in 0..40 {
            assert_ok!(store.save(&format!("a_{}", i), b"x", expiry).await);
        }
        // removed mid-scan by another caller
        for i in 100..120 {
            assert_ok!(store.save(&format!("a_{}", i), b"x", expiry).await);
        }
        assert_ok!(store.save("bar_1", b"keep", expiry).await);

        assert_ok!(store.delete_by_pattern("a_").await);

        let steps = scans.load(Ordering::SeqCst);
        assert!(steps > 20, "scan should span many pages, took {}", steps);
        for i in 0..40 {
            assert!(!raw.contains_key(&format!("scs:session:a_{}", i)), "a_{} survived", i);
        }
        assert!(raw.contains_key("scs:session:bar_1"));
        assert!(raw.contains_key("zzz:keep"));
        for step in 1..steps {
            assert!(raw.contains_key(&format!("scs:session:b_{}", step)));
            assert!(raw.contains_key(&format!("zzz:{}", step)));
        }
        assert!(raw.contains_key("aaa:0"));
        assert_eq!(raw.checked_out(), 0);
    }
}
