//! Mock provider implementations for testing.
//!
//! This module provides simple, in-memory implementations of all provider traits
//! for use in unit and integration tests. Time-dependent mocks read an injected
//! [`Clock`](crate::clock::Clock), so expiry is driven by [`ManualClock`].

pub mod clock;
pub mod identity;
pub mod kv;
pub mod notifier;
pub mod password;
pub mod user;

pub use clock::{FixedClock, ManualClock, test_epoch};
pub use identity::MockIdentityProvider;
pub use kv::MemoryKeyValueStore;
pub use notifier::{MockNotifier, SentCode};
pub use password::MockPasswordHasher;
pub use user::MockUserDirectory;
