//! In-memory key-value store for testing.
//!
//! Mirrors the Redis semantics the core depends on: per-key TTL, per-field
//! hash TTL, `KEEPTTL` rewrites and atomic hash-field take. Expiry is
//! evaluated against the injected clock, so tests advance time instead of
//! sleeping.

use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::providers::KeyValueStore;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Field {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, Field>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

fn alive(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_none_or(|at| at > now)
}

fn after(now: DateTime<Utc>, ttl_secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
}

fn wrong_type(key: &str) -> AuthError {
    AuthError::Store(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

/// In-memory key-value store.
#[derive(Clone)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKeyValueStore {
    /// Create an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Lock, drop everything expired, then apply `f`.
    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>, DateTime<Utc>) -> Result<T>) -> Result<T> {
        let now = self.clock.now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AuthError::Internal("Mutex lock failed".to_string()))?;

        entries.retain(|_, entry| {
            if !alive(entry.expires_at, now) {
                return false;
            }
            if let Value::Hash(fields) = &mut entry.value {
                fields.retain(|_, field| alive(field.expires_at, now));
                return !fields.is_empty();
            }
            true
        });

        f(&mut entries, now)
    }

    fn hash_mut<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Result<Option<&'a mut HashMap<String, Field>>> {
        match entries.get_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(Some(fields)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    /// Whether a live key exists (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn contains(&self, key: &str) -> Result<bool> {
        self.with_entries(|entries, _| Ok(entries.contains_key(key)))
    }

    /// Remaining lifetime of a key, `None` if absent or persistent (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.with_entries(|entries, now| {
            Ok(entries
                .get(key)
                .and_then(|entry| entry.expires_at)
                .map(|at| at - now))
        })
    }

    /// Write a raw string without TTL, bypassing record encoding (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn insert_raw(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(|entries, _| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: None,
                },
            );
            Ok(())
        })
    }

    /// Live keys starting with `prefix` (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.with_entries(|entries, _| {
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries, _| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.with_entries(|entries, now| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: after(now, ttl_secs),
                },
            );
            Ok(())
        })
    }

    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(|entries, _| {
            let expires_at = entries.get(key).and_then(|entry| entry.expires_at);
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at,
                },
            );
            Ok(())
        })
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.with_entries(|entries, _| {
            entries.remove(key);
            Ok(())
        })
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.with_entries(|entries, _| {
            Ok(Self::hash_mut(entries, key)?
                .and_then(|fields| fields.get(field))
                .map(|f| f.value.clone()))
        })
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.with_entries(|entries, _| {
            Ok(Self::hash_mut(entries, key)?
                .map(|fields| {
                    fields
                        .iter()
                        .map(|(name, f)| (name.clone(), f.value.clone()))
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.with_entries(|entries, _| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            let Value::Hash(fields) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            // Overwriting a field clears its TTL, as in Redis.
            fields.insert(
                field.to_string(),
                Field {
                    value: value.to_string(),
                    expires_at: None,
                },
            );
            Ok(())
        })
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        self.with_entries(|entries, _| {
            let removed = Self::hash_mut(entries, key)?
                .and_then(|fields| fields.remove(field))
                .is_some();
            if matches!(entries.get(key), Some(Entry { value: Value::Hash(fields), .. }) if fields.is_empty())
            {
                entries.remove(key);
            }
            Ok(removed)
        })
    }

    async fn htake(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.with_entries(|entries, _| {
            let taken = Self::hash_mut(entries, key)?
                .and_then(|fields| fields.remove(field))
                .map(|f| f.value);
            if matches!(entries.get(key), Some(Entry { value: Value::Hash(fields), .. }) if fields.is_empty())
            {
                entries.remove(key);
            }
            Ok(taken)
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.with_entries(|entries, now| {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = after(now, ttl_secs);
            }
            Ok(())
        })
    }

    async fn hexpire(&self, key: &str, field: &str, ttl_secs: u64) -> Result<()> {
        self.with_entries(|entries, now| {
            if let Some(f) = Self::hash_mut(entries, key)?.and_then(|fields| fields.get_mut(field)) {
                f.expires_at = after(now, ttl_secs);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ManualClock;

    fn store() -> (MemoryKeyValueStore, ManualClock) {
        let clock = ManualClock::default();
        (MemoryKeyValueStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_string_expiry() {
        let (kv, clock) = store();
        kv.set_ex("k", "v", 10).await.unwrap();
        clock.advance(Duration::seconds(9));
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
        clock.advance(Duration::seconds(1));
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keep_ttl_preserves_expiry() {
        let (kv, clock) = store();
        kv.set_ex("k", "v1", 10).await.unwrap();
        clock.advance(Duration::seconds(4));
        kv.set_keep_ttl("k", "v2").await.unwrap();
        assert_eq!(kv.ttl("k").unwrap(), Some(Duration::seconds(6)));
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_hash_field_expiry() {
        let (kv, clock) = store();
        kv.hset("h", "a", "1").await.unwrap();
        kv.hset("h", "b", "2").await.unwrap();
        kv.hexpire("h", "a", 5).await.unwrap();
        clock.advance(Duration::seconds(5));

        let all = kv.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_empty_hash_disappears() {
        let (kv, _) = store();
        kv.hset("h", "a", "1").await.unwrap();
        assert_eq!(kv.htake("h", "a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(kv.htake("h", "a").await.unwrap(), None);
        assert!(!kv.contains("h").unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let (kv, _) = store();
        kv.set_ex("k", "v", 10).await.unwrap();
        assert!(matches!(kv.hget("k", "f").await, Err(AuthError::Store(_))));
    }
}
