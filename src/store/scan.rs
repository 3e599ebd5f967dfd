//! Incremental key scan
//!
//! The scan walks a live keyspace one page at a time instead of listing it
//! in one blocking command. It is not a snapshot: keys written or removed
//! while it runs may or may not show up.

use super::backend::CacheConnection;
use crate::error::StoreError;

/// Lazy, restartable sequence of scan pages for one match expression
#[derive(Debug, Clone)]
pub struct KeyScan {
    pattern: String,
    cursor: u64,
    finished: bool,
}

impl KeyScan {
    /// Start a scan for a glob match expression
    pub fn new<S: Into<String>>(pattern: S) -> Self {
        Self {
            pattern: pattern.into(),
            cursor: 0,
            finished: false,
        }
    }

    /// The match expression sent to the backend
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the backend has completed its pass over the keyspace
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Go back to the start of the keyspace
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.finished = false;
    }

    /// Fetch the next page of keys
    ///
    /// Returns `Ok(None)` once the scan is finished. Pages can be empty while
    /// the scan is still running. On error the cursor is left unchanged, so
    /// calling again retries the same page.
    pub async fn next_batch<C>(&mut self, conn: &mut C) -> Result<Option<Vec<String>>, StoreError>
    where
        C: CacheConnection + ?Sized,
    {
        if self.finished {
            return Ok(None);
        }

        let page = conn.scan(self.cursor, &self.pattern).await?;
        self.cursor = page.cursor;
        // cursor 0 is both the start sentinel and the completion signal
        if page.cursor == 0 {
            self.finished = true;
        }
        Ok(Some(page.keys))
    }
}

/// Escape glob metacharacters so `literal` only matches itself
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
