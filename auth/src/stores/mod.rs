//! Storage implementations.
//!
//! - **Key-value store** (Redis) - sessions, one-time codes and OAuth attempts, all with TTL

pub mod redis_kv;

// Re-exports
pub use redis_kv::RedisKeyValueStore;
