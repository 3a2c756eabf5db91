//! # Federated Auth
//!
//! Session, one-time code and OAuth account-linking lifecycle for an
//! authentication backend.
//!
//! ## Features
//!
//! - **Rotating refresh sessions**: every refresh token is bound to exactly
//!   one stored session and can be exchanged at most once
//! - **Bounded sessions**: per-user capacity with oldest-first eviction
//! - **One-time codes**: escalating request throttling and limited guesses
//! - **OAuth linking**: multi-step sign-in and sign-up attempts that fail
//!   closed when the directory changes underneath them
//! - **Testable**: every collaborator is a trait with an in-memory mock
//!
//! ## Architecture
//!
//! ```text
//! AuthService
//!   ├── SessionIssuer ── TokenIssuer (HS512 access / refresh JWTs)
//!   │                └── SessionStore   session:<userId>
//!   ├── CodeEngine                      code:<actionKey>
//!   └── OAuthCoordinator                oauth-attempt:<attemptId>
//!                          │
//!              KeyValueStore (Redis) · UserDirectory · Notifier
//! ```
//!
//! ## Example: refresh rotation
//!
//! ```rust,ignore
//! use federated_auth::*;
//!
//! let service = AuthService::new(env, AuthConfig::from_env()?)?;
//!
//! let login = service.sign_in("ada@example.com", "pw", &client).await?;
//! let rotated = service.refresh(&login.tokens.refresh_token, &client).await?;
//!
//! // The first refresh token is spent.
//! assert!(service.refresh(&login.tokens.refresh_token, &client).await.is_err());
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod clock;
pub mod code;
pub mod config;
pub mod environment;
pub mod error;
pub mod oauth;
pub mod providers;
pub mod record;
pub mod service;
pub mod session;
pub mod state;
pub mod stores;
pub mod token;

// Mock implementations for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use clock::{Clock, SystemClock};
pub use config::AuthConfig;
pub use environment::AuthEnvironment;
pub use error::{AuthError, Result};
pub use oauth::{OAuthOutcome, SignUpInput};
pub use service::AuthService;
pub use state::{AttemptId, AuthSuccess, ClientInfo, SessionId, TokenPair, UserId};
