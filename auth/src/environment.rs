//! Authentication environment.
//!
//! Bundles the injected collaborators the [`AuthService`](crate::service::AuthService)
//! is built from.

use crate::clock::Clock;
use crate::providers::{IdentityProvider, KeyValueStore, Notifier, PasswordHasher, UserDirectory};
use std::sync::Arc;

/// Authentication environment.
///
/// # Type Parameters
///
/// - `K`: Key-value store (sessions, codes, OAuth attempts)
/// - `U`: User directory
/// - `N`: Notifier
/// - `P`: Password hasher
/// - `I`: Identity provider
#[derive(Clone)]
pub struct AuthEnvironment<K, U, N, P, I>
where
    K: KeyValueStore + Clone,
    U: UserDirectory + Clone,
    N: Notifier,
    P: PasswordHasher,
    I: IdentityProvider,
{
    /// Key-value store (`Redis` in production).
    pub kv: K,

    /// User directory (relational storage outside this crate).
    pub users: U,

    /// Code delivery.
    pub notifier: N,

    /// Password hasher.
    pub hasher: P,

    /// OAuth identity provider.
    pub identity: I,

    /// Time source for expiry and throttling decisions.
    pub clock: Arc<dyn Clock>,
}

impl<K, U, N, P, I> AuthEnvironment<K, U, N, P, I>
where
    K: KeyValueStore + Clone,
    U: UserDirectory + Clone,
    N: Notifier,
    P: PasswordHasher,
    I: IdentityProvider,
{
    /// Create a new authentication environment.
    #[must_use]
    pub fn new(kv: K, users: U, notifier: N, hasher: P, identity: I, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            users,
            notifier,
            hasher,
            identity,
            clock,
        }
    }
}
