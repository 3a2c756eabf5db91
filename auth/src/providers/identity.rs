//! Identity provider trait.

use crate::error::Result;
use crate::state::OAuthProvider;
use super::ProviderProfile;

/// Identity provider.
///
/// Exchanges an OAuth authorization code for the provider's view of the
/// user. The result feeds the OAuth attempt coordinator.
pub trait IdentityProvider: Send + Sync {
    /// Exchange `code` (with its PKCE verifier) and fetch the profile.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The provider refuses the code → `AuthError::OAuthProviderRejected`
    /// - The provider is unreachable or failing → `AuthError::OAuthProviderUnavailable`
    /// - The provider is not configured → `AuthError::Configuration`
    fn fetch_profile(
        &self,
        provider: OAuthProvider,
        code: &str,
        code_verifier: &str,
    ) -> impl std::future::Future<Output = Result<ProviderProfile>> + Send;
}
