//! Mock password hasher for testing.

use crate::error::Result;
use crate::providers::PasswordHasher;

/// Mock password hasher.
///
/// Reversible and instant, so tests do not pay for Argon2.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockPasswordHasher;

impl MockPasswordHasher {
    /// Create a new mock password hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PasswordHasher for MockPasswordHasher {
    fn hash(&self, password: &str) -> Result<String> {
        Ok(format!("hashed:{password}"))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        Ok(hash.strip_prefix("hashed:") == Some(password))
    }
}
