//! Key-value store trait.

use crate::error::Result;
use std::collections::HashMap;

/// Key-value store.
///
/// This trait abstracts over the expiring store (Redis) that holds session,
/// code and OAuth attempt records. Values are opaque strings; the typed
/// encoding lives in [`crate::record`].
///
/// # Implementation Notes
///
/// - Missing keys and missing hash fields are `None`, never an error
/// - TTLs are whole seconds
/// - `htake` must be atomic: two concurrent callers never both receive the value
pub trait KeyValueStore: Send + Sync {
    /// Get a string value.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Option<String>>> + Send;

    /// Set a string value with a TTL, replacing any previous value and TTL.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Overwrite a string value while keeping its remaining TTL.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn set_keep_ttl(
        &self,
        key: &str,
        value: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Delete a key (string or hash).
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn del(&self, key: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Get one hash field.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn hget(
        &self,
        key: &str,
        field: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>>> + Send;

    /// Get every field of a hash (empty map if the key is absent).
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn hgetall(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<HashMap<String, String>>> + Send;

    /// Set one hash field.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Delete one hash field, reporting whether it existed.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn hdel(&self, key: &str, field: &str)
    -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Atomically read and delete one hash field.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn htake(
        &self,
        key: &str,
        field: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>>> + Send;

    /// Set the TTL of a whole key.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn expire(&self, key: &str, ttl_secs: u64)
    -> impl std::future::Future<Output = Result<()>> + Send;

    /// Set the TTL of a single hash field.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable or lacks per-field expiry.
    fn hexpire(
        &self,
        key: &str,
        field: &str,
        ttl_secs: u64,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
