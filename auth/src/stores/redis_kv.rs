//! Redis-backed key-value store.
//!
//! Sessions live in one hash per user with per-field expiry (`HEXPIRE`,
//! Redis 7.4+). Code and attempt records are plain strings with `SET EX`.
//!
//! # Example
//!
//! ```no_run
//! use federated_auth::stores::RedisKeyValueStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisKeyValueStore::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::providers::KeyValueStore;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::collections::HashMap;

/// Redis key-value store.
///
/// Connection pooling via `ConnectionManager`; clones share the connection.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisKeyValueStore {
    /// Create a new Redis key-value store.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns error if connection to Redis fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| AuthError::Configuration(format!("Invalid Redis URL: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await?;

        Ok(Self { conn_manager })
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub const fn from_connection_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

fn failed<'a>(op: &'static str, key: &'a str) -> impl FnOnce(RedisError) -> AuthError + 'a {
    move |e| AuthError::Store(format!("{op} {key} failed: {e}"))
}

fn seconds(ttl_secs: u64) -> i64 {
    i64::try_from(ttl_secs).unwrap_or(i64::MAX)
}

impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        conn.get(key).await.map_err(failed("GET", key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .set_ex(key, value, ttl_secs)
            .await
            .map_err(failed("SET EX", key))?;
        tracing::debug!(key = %key, ttl_secs = ttl_secs, "Stored record");
        Ok(())
    }

    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await
            .map_err(failed("SET KEEPTTL", key))?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.del(key).await.map_err(failed("DEL", key))?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        conn.hget(key, field).await.map_err(failed("HGET", key))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn_manager.clone();
        conn.hgetall(key).await.map_err(failed("HGETALL", key))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .hset(key, field, value)
            .await
            .map_err(failed("HSET", key))?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = conn.hdel(key, field).await.map_err(failed("HDEL", key))?;
        Ok(removed > 0)
    }

    async fn htake(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();

        // MULTI/EXEC: of two concurrent takers, only one sees the value.
        let (value,): (Option<String>,) = redis::pipe()
            .atomic()
            .hget(key, field)
            .hdel(key, field)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(failed("HGET+HDEL", key))?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .expire(key, seconds(ttl_secs))
            .await
            .map_err(failed("EXPIRE", key))?;
        Ok(())
    }

    async fn hexpire(&self, key: &str, field: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: Vec<i64> = redis::cmd("HEXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .arg("FIELDS")
            .arg(1)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(failed("HEXPIRE", key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    fn unique(prefix: &str) -> String {
        format!("test:{prefix}:{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis 7.4+"]
    async fn test_string_round_trip_and_keep_ttl() {
        let store = RedisKeyValueStore::new(&redis_url()).await.unwrap();
        let key = unique("code");

        store.set_ex(&key, "one", 60).await.unwrap();
        store.set_keep_ttl(&key, "two").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("two"));

        let mut conn = store.conn_manager.clone();
        let ttl: i64 = conn.ttl(&key).await.unwrap();
        assert!(ttl > 0 && ttl <= 60);

        store.del(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis 7.4+"]
    async fn test_htake_is_single_use() {
        let store = RedisKeyValueStore::new(&redis_url()).await.unwrap();
        let key = unique("session");

        store.hset(&key, "a", "1").await.unwrap();
        store.hexpire(&key, "a", 60).await.unwrap();
        store.expire(&key, 60).await.unwrap();

        let (first, second) = tokio::join!(store.htake(&key, "a"), store.htake(&key, "a"));
        let taken: Vec<_> = [first.unwrap(), second.unwrap()]
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(taken, vec!["1".to_string()]);
        assert!(store.hgetall(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis 7.4+"]
    async fn test_hdel_reports_presence() {
        let store = RedisKeyValueStore::new(&redis_url()).await.unwrap();
        let key = unique("session");

        store.hset(&key, "a", "1").await.unwrap();
        assert!(store.hdel(&key, "a").await.unwrap());
        assert!(!store.hdel(&key, "a").await.unwrap());
    }
}
