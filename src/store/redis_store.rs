//! Redis cache backend
//!
//! Commands issued per store operation:
//! - find: `GET key`
//! - save: `MULTI; SET key value; PEXPIREAT key ms; EXEC`
//! - delete: `DEL key`
//! - delete_by_pattern: `SCAN cursor MATCH expr` until the cursor returns
//!   to 0, then `UNLINK key` for each match

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use redis::{RedisResult, Value};

use super::backend::{CacheBackend, CacheConnection, Lookup, ScanPage};
use super::cache_store::CacheStore;
use crate::config::{RedisConfig, StoreConfig};
use crate::error::StoreError;

/// Session store backed by Redis
///
/// # Example
///
/// ```rust,ignore
/// use kv_session_store::{RedisConfig, RedisStore, SessionStore, StoreConfig};
///
/// let store = RedisStore::connect(&RedisConfig::new("redis://127.0.0.1/"), StoreConfig::default()).await?;
/// store.save("token", b"payload", chrono::Utc::now() + chrono::Duration::hours(1)).await?;
/// ```
pub type RedisStore = CacheStore<RedisBackend>;

/// Redis backend over a `deadpool_redis` connection pool
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Wrap an existing pool
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from pool settings
    pub fn from_config(config: &RedisConfig) -> Result<Self, StoreError> {
        let timeout = config.timeout();
        let mut pool_config = Config::from_url(config.url.as_str());
        let mut pool = pool_config
            .pool
            .take()
            .unwrap_or_else(|| PoolConfig::new(config.pool_size));
        pool.max_size = config.pool_size;
        pool.timeouts.wait = Some(timeout);
        pool.timeouts.create = Some(timeout);
        pool.timeouts.recycle = Some(timeout);
        pool_config.pool = Some(pool);

        let pool = pool_config.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self::new(pool))
    }

    /// The underlying pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl RedisStore {
    /// Create a store from an existing pool with the default prefix
    pub fn from_pool(pool: Pool) -> Self {
        Self::with_backend(RedisBackend::new(pool))
    }

    /// Create a store from pool settings, checking that Redis is reachable
    pub async fn connect(redis: &RedisConfig, config: StoreConfig) -> Result<Self, StoreError> {
        let backend = RedisBackend::from_config(redis)?;
        // one checkout proves the URL and credentials before first use
        drop(backend.acquire().await?);
        tracing::info!(url = %redacted_url(&redis.url), prefix = %config.prefix, "Connected to Redis session backend");
        Ok(Self::new(backend, config))
    }

    /// Create a store from a connection string with default pool settings
    pub async fn from_url(url: &str) -> Result<Self, StoreError> {
        Self::connect(&RedisConfig::new(url), StoreConfig::default()).await
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    type Connection = RedisConnection;

    async fn acquire(&self) -> Result<RedisConnection, StoreError> {
        let conn = self.pool.get().await?;
        Ok(RedisConnection { conn })
    }
}

/// A connection checked out of the pool; returned to it on drop
pub struct RedisConnection {
    conn: deadpool_redis::Connection,
}

/// Connection URL with any username and password stripped, for logging
pub fn redacted_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            // both setters only fail for URLs that cannot carry credentials
            let _ = parsed.set_password(None);
            let _ = parsed.set_username("");
            parsed.to_string()
        }
        Err(_) => "<unparseable redis url>".to_string(),
    }
}

/// Keep the UTF-8 keys of a `SCAN` reply
///
/// Session keys are always UTF-8 (prefix and token are strings), so a key
/// that isn't can't belong to this store and is skipped.
pub fn keys_from_scan_reply(raw: Vec<Vec<u8>>) -> Vec<String> {
    raw.into_iter()
        .filter_map(|key| match String::from_utf8(key) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(key = ?e.as_bytes(), "skipping non UTF-8 key in scan reply");
                None
            }
        })
        .collect()
}

/// Translate a raw `GET` reply into a [`Lookup`]
///
/// Nil is absence, not failure. Reply shapes a `GET` can't legitimately
/// produce are treated as absent rather than handed to the caller.
pub fn lookup_from_reply(reply: RedisResult<Value>) -> Lookup {
    match reply {
        Ok(Value::Nil) => Lookup::Absent,
        Ok(Value::BulkString(bytes)) => Lookup::Found(bytes),
        Ok(other) => {
            tracing::debug!(reply = ?other, "unexpected GET reply, treating session as absent");
            Lookup::Absent
        }
        Err(e) => Lookup::Failed(e.into()),
    }
}

#[async_trait]
impl CacheConnection for RedisConnection {
    async fn get(&mut self, key: &str) -> Lookup {
        let reply = redis::cmd("GET").arg(key).query_async(&mut self.conn).await;
        lookup_from_reply(reply)
    }

    async fn set_with_expiry(
        &mut self,
        key: &str,
        value: &[u8],
        expires_at_ms: i64,
    ) -> Result<(), StoreError> {
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(value)
            .ignore()
            .cmd("PEXPIREAT")
            .arg(key)
            .arg(expires_at_ms)
            .ignore()
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn unlink(&mut self, key: &str) -> Result<(), StoreError> {
        let _: () = redis::cmd("UNLINK").arg(key).query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn scan(&mut self, cursor: u64, pattern: &str) -> Result<ScanPage, StoreError> {
        let (cursor, keys): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .query_async(&mut self.conn)
            .await?;
        Ok(ScanPage {
            cursor,
            keys: keys_from_scan_reply(keys),
        })
    }
}
