//! Mock identity provider for testing.

use crate::error::{AuthError, Result};
use crate::providers::{IdentityProvider, ProviderProfile};
use crate::state::OAuthProvider;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock identity provider.
///
/// Returns the profile registered for an authorization code. Unknown codes
/// are rejected the way a provider rejects a stale code.
#[derive(Debug, Clone, Default)]
pub struct MockIdentityProvider {
    profiles: Arc<Mutex<HashMap<(OAuthProvider, String), ProviderProfile>>>,
}

impl MockIdentityProvider {
    /// Create a new mock identity provider with no known codes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `code` resolve to `profile` at the profile's provider.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn register(&self, code: &str, profile: ProviderProfile) -> Result<()> {
        self.profiles
            .lock()
            .map_err(|_| AuthError::Internal("Mutex lock failed".to_string()))?
            .insert((profile.provider, code.to_string()), profile);
        Ok(())
    }
}

impl IdentityProvider for MockIdentityProvider {
    async fn fetch_profile(
        &self,
        provider: OAuthProvider,
        code: &str,
        _code_verifier: &str,
    ) -> Result<ProviderProfile> {
        self.profiles
            .lock()
            .map_err(|_| AuthError::Internal("Mutex lock failed".to_string()))?
            .get(&(provider, code.to_string()))
            .cloned()
            .ok_or(AuthError::OAuthProviderRejected { status: 400 })
    }
}
