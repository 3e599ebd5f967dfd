//! In-memory cache backend
//!
//! This is primarily for development and testing.
//! For production, use RedisStore or another persistent store.
//!
//! It emulates the subset of Redis the session store relies on: absolute
//! millisecond expiry, glob `MATCH`, and a cursor `SCAN` that examines a
//! bounded number of slots per call.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{self, Excluded, Unbounded};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::backend::{CacheBackend, CacheConnection, Lookup, ScanPage};
use crate::error::StoreError;
use crate::timestamp::{is_elapsed, now_millis};

/// Default number of slots examined per scan call (Redis uses 10)
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 10;

struct StoredValue {
    value: Vec<u8>,
    expires_at_ms: Option<i64>,
}

impl StoredValue {
    fn is_live(&self, now_ms: i64) -> bool {
        match self.expires_at_ms {
            Some(exp) => !is_elapsed(exp, now_ms),
            None => true,
        }
    }
}

struct Inner {
    entries: RwLock<BTreeMap<String, StoredValue>>,
    scan_page_size: usize,
    // last key examined by each live scan, keyed by cursor id
    cursors: Mutex<HashMap<u64, String>>,
    next_cursor: AtomicU64,
    available: AtomicBool,
    checked_out: AtomicUsize,
}

/// In-memory key-value backend
///
/// Warning: This backend is not suitable for production use because:
/// - Data is lost on restart
/// - Data is not shared across processes
/// - Expired entries are only reclaimed by [`MemoryBackend::purge_expired`]
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create a new memory backend
    pub fn new() -> Self {
        Self::with_scan_page_size(DEFAULT_SCAN_PAGE_SIZE)
    }

    /// Create a memory backend whose scans examine `page_size` slots per call
    pub fn with_scan_page_size(page_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(BTreeMap::new()),
                scan_page_size: page_size.max(1),
                cursors: Mutex::new(HashMap::new()),
                next_cursor: AtomicU64::new(1),
                available: AtomicBool::new(true),
                checked_out: AtomicUsize::new(0),
            }),
        }
    }

    /// Simulate the backend going away (or coming back)
    ///
    /// While unavailable, `acquire` and every command on an already
    /// checked-out connection fail.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Number of connections currently checked out
    pub fn checked_out(&self) -> usize {
        self.inner.checked_out.load(Ordering::SeqCst)
    }

    /// Store a raw value without expiry, bypassing any namespacing
    pub fn insert_raw<K: Into<String>>(&self, key: K, value: &[u8]) {
        self.inner.entries.write().insert(
            key.into(),
            StoredValue {
                value: value.to_vec(),
                expires_at_ms: None,
            },
        );
    }

    /// Whether a raw key holds a live value
    pub fn contains_key(&self, key: &str) -> bool {
        let now = now_millis();
        self.inner
            .entries
            .read()
            .get(key)
            .is_some_and(|stored| stored.is_live(now))
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Whether no entries are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry whose expiry has passed
    pub fn purge_expired(&self) -> usize {
        let now = now_millis();
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|_, stored| stored.is_live(now));
        before - entries.len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection, StoreError> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory backend is offline".to_string()));
        }
        self.inner.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            inner: Arc::clone(&self.inner),
        })
    }
}

/// A checked-out connection to a [`MemoryBackend`]
pub struct MemoryConnection {
    inner: Arc<Inner>,
}

impl MemoryConnection {
    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Command("connection lost".to_string()))
        }
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection").finish_non_exhaustive()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.inner.checked_out.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheConnection for MemoryConnection {
    async fn get(&mut self, key: &str) -> Lookup {
        if let Err(e) = self.ensure_available() {
            return Lookup::Failed(e);
        }
        let now = now_millis();
        match self.inner.entries.read().get(key) {
            Some(stored) if stored.is_live(now) => Lookup::Found(stored.value.clone()),
            _ => Lookup::Absent,
        }
    }

    async fn set_with_expiry(
        &mut self,
        key: &str,
        value: &[u8],
        expires_at_ms: i64,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut entries = self.inner.entries.write();
        // PEXPIREAT with a past timestamp deletes the key
        if is_elapsed(expires_at_ms, now_millis()) {
            entries.remove(key);
        } else {
            entries.insert(
                key.to_string(),
                StoredValue {
                    value: value.to_vec(),
                    expires_at_ms: Some(expires_at_ms),
                },
            );
        }
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.inner.entries.write().remove(key);
        Ok(())
    }

    async fn unlink(&mut self, key: &str) -> Result<(), StoreError> {
        self.delete(key).await
    }

    async fn scan(&mut self, cursor: u64, pattern: &str) -> Result<ScanPage, StoreError> {
        self.ensure_available()?;
        let now = now_millis();
        let entries = self.inner.entries.read();

        // A cursor resumes after the last key it examined, so a key present
        // for the whole scan is returned whatever else changes meanwhile.
        let resume_after = match cursor {
            0 => None,
            id => match self.inner.cursors.lock().remove(&id) {
                Some(last) => Some(last),
                None => return Err(StoreError::Command(format!("invalid cursor {}", id))),
            },
        };
        let lower: Bound<&str> = match &resume_after {
            Some(last) => Excluded(last.as_str()),
            None => Unbounded,
        };
        let upper: Bound<&str> = Unbounded;
        let mut remaining = entries.range::<str, _>((lower, upper));

        let mut keys = Vec::new();
        let mut last_examined = None;
        for (key, stored) in remaining.by_ref().take(self.inner.scan_page_size) {
            if stored.is_live(now) && glob_match(pattern, key) {
                keys.push(key.clone());
            }
            last_examined = Some(key);
        }

        let cursor = match (last_examined, remaining.next()) {
            (Some(last), Some(_)) => {
                let id = self.inner.next_cursor.fetch_add(1, Ordering::SeqCst);
                self.inner.cursors.lock().insert(id, last.clone());
                id
            }
            _ => 0,
        };
        Ok(ScanPage { cursor, keys })
    }
}

/// Redis-style glob match: `*`, `?`, `[abc]`, `[^a]`, `[a-z]` and `\` escapes
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_at(&pattern, &text)
}

fn glob_match_at(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Backtrack point for the most recent `*`
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => Some(p + 1),
            Some('[') => match_class(pattern, p, text[t]),
            Some('\\') if p + 1 < pattern.len() => (pattern[p + 1] == text[t]).then_some(p + 2),
            Some(&c) => (c == text[t]).then_some(p + 1),
            None => None,
        };

        match step {
            Some(next) => {
                p = next;
                t += 1;
            }
            None => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Match `c` against the class opening at `pattern[open]`; returns the index after `]`
fn match_class(pattern: &[char], open: usize, c: char) -> Option<usize> {
    let mut i = open + 1;
    let negate = pattern.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        if pattern[i] == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    // An unterminated class consumes the rest of the pattern
    let next = if i < pattern.len() { i + 1 } else { i };
    (matched != negate).then_some(next)
}
