//! Collaborator contracts.
//!
//! This module defines traits for every external dependency of the
//! authentication core. The core holds them as generic parameters, so the
//! same logic runs against Redis and a relational directory in production
//! and against the in-memory mocks in tests.
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────┐
//! │ KeyValueStore│   │ UserDirectory │   │ Notifier │
//! │ sessions,    │   │ accounts,     │   │ codes to │
//! │ codes,       │   │ provider      │   │ the user │
//! │ attempts     │   │ links         │   │          │
//! └──────┬───────┘   └──────┬────────┘   └────┬─────┘
//!        └──────────────────┼─────────────────┘
//!                           ▼
//!                     AuthService
//! ```

use crate::state::{OAuthProvider, Role, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

pub mod console_notifier;
pub mod http_identity;
pub mod identity;
pub mod kv;
pub mod notifier;
pub mod password;
pub mod user;

// Re-export provider traits
pub use console_notifier::ConsoleNotifier;
pub use http_identity::HttpIdentityProvider;
pub use identity::IdentityProvider;
pub use kv::KeyValueStore;
pub use notifier::Notifier;
pub use password::{Argon2PasswordHasher, PasswordHasher};
pub use user::UserDirectory;

/// User data model.
///
/// Owned by the user directory; this crate only reads it and requests
/// targeted mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID.
    pub id: UserId,

    /// Email address.
    pub email: String,

    /// Given name.
    pub first_name: Option<String>,

    /// Family name.
    pub last_name: Option<String>,

    /// Password hash. `None` for accounts created through OAuth only.
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,

    /// Role.
    pub role: Role,

    /// Avatar URL.
    pub avatar_url: Option<String>,

    /// Account created timestamp.
    pub created_at: DateTime<Utc>,
}

/// A third-party identity: provider plus the provider's stable user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLink {
    /// Provider name.
    pub provider: OAuthProvider,

    /// User ID at the provider.
    pub provider_user_id: String,
}

/// Account creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Email address.
    pub email: String,

    /// Given name.
    pub first_name: Option<String>,

    /// Family name.
    pub last_name: Option<String>,

    /// Password hash.
    pub password_hash: Option<String>,

    /// Initial role.
    pub role: Role,

    /// Avatar URL.
    pub avatar_url: Option<String>,

    /// Provider identity to link on creation.
    pub provider: Option<ProviderLink>,
}

/// A provider's view of the user, as returned by [`IdentityProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    /// Provider name.
    pub provider: OAuthProvider,

    /// User ID at the provider.
    pub provider_user_id: String,

    /// Email, if the provider shared one.
    pub email: Option<String>,

    /// Whether the provider vouches for `email`.
    pub email_verified: bool,

    /// Given name.
    pub first_name: Option<String>,

    /// Family name.
    pub last_name: Option<String>,

    /// Avatar URL.
    pub avatar_url: Option<String>,
}

impl ProviderProfile {
    /// The provider identity this profile belongs to.
    #[must_use]
    pub fn link(&self) -> ProviderLink {
        ProviderLink {
            provider: self.provider,
            provider_user_id: self.provider_user_id.clone(),
        }
    }
}

/// Why a code was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodePurpose {
    /// Email ownership check before account creation.
    SignUp,
    /// Passwordless sign-in.
    SignIn,
    /// Password reset.
    PasswordReset,
    /// Ownership check of a new email address.
    EmailChange,
    /// Account deletion confirmation.
    UserDeletion,
    /// Linking a provider to an existing account.
    OAuthSignIn,
    /// Verifying the email of an OAuth sign-up.
    OAuthSignUp,
}

impl CodePurpose {
    /// Get the purpose as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SignUp => "sign-up",
            Self::SignIn => "sign-in",
            Self::PasswordReset => "password-reset",
            Self::EmailChange => "email-change",
            Self::UserDeletion => "user-deletion",
            Self::OAuthSignIn => "oauth-sign-in",
            Self::OAuthSignUp => "oauth-sign-up",
        }
    }
}

impl fmt::Display for CodePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context delivered alongside a code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContext {
    /// Why the code was requested.
    pub purpose: CodePurpose,

    /// Address the request came from.
    pub ip: IpAddr,

    /// When the request was made.
    pub requested_at: DateTime<Utc>,
}
