//! Error types for the session, code and OAuth linking lifecycle.

use crate::state::{SignUpField, TokenType};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Comprehensive error taxonomy for the authentication core.
///
/// Domain variants describe something the end user (or their client) must
/// act on. The trailing system variants mean the backend itself is broken
/// and are never caused by user input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    // ═══════════════════════════════════════════════════════════
    // Token Errors
    // ═══════════════════════════════════════════════════════════

    /// Token is correctly signed but past its expiry.
    ///
    /// Access tokens in this state are recoverable through a refresh.
    #[error("{token_type} token expired at {expired_at}")]
    TokenExpired {
        /// Which kind of token expired
        token_type: TokenType,
        /// Expiry claim of the token
        expired_at: DateTime<Utc>,
    },

    /// Token signature could not be verified (or the token is malformed).
    #[error("{token_type} token signature is invalid")]
    TokenSignatureInvalid {
        /// Which kind of token was presented
        token_type: TokenType,
    },

    /// Token is correctly signed but its claims do not have the expected shape.
    #[error("{token_type} token payload is invalid")]
    TokenPayloadInvalid {
        /// Which kind of token was presented
        token_type: TokenType,
    },

    // ═══════════════════════════════════════════════════════════
    // Session Errors
    // ═══════════════════════════════════════════════════════════

    /// The targeted session does not exist (never created, consumed or expired).
    #[error("Session not found or has expired")]
    SessionNotFoundOrExpired,

    /// The presented refresh token is not the one bound to the session.
    #[error("Refresh token does not match the session binding")]
    SessionSignatureMismatch,

    /// Session capacity reached and the overflow policy refuses new sessions.
    #[error("Cannot have more than {max} concurrent sessions")]
    MaxSessionsExceeded {
        /// Configured capacity
        max: usize,
    },

    /// The current session is too young to revoke other sessions.
    #[error("Session created at {created_at} is too recent to revoke other sessions")]
    SessionRevocationTooEarly {
        /// Creation time of the current session
        created_at: DateTime<Utc>,
    },

    // ═══════════════════════════════════════════════════════════
    // One-Time Code Errors
    // ═══════════════════════════════════════════════════════════

    /// A new code was requested before the escalating interval elapsed.
    #[error("Too many code requests, retry at {allowed_at}")]
    CodeRateLimited {
        /// Earliest instant a new code may be requested
        allowed_at: DateTime<Utc>,
    },

    /// All verification attempts for the current code are spent.
    #[error("No verification attempts left for this code")]
    CodeMaxAttemptsExceeded,

    /// No live code exists for this action.
    #[error("Code not found or has expired")]
    CodeNotFoundOrExpired,

    /// Submitted code does not match.
    #[error("Incorrect code, {attempts_left} attempts left")]
    CodeIncorrect {
        /// Remaining verification attempts
        attempts_left: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // OAuth Attempt Errors
    // ═══════════════════════════════════════════════════════════

    /// The attempt does not exist (unknown id, wrong kind or TTL expired).
    #[error("OAuth attempt not found or has expired")]
    OAuthAttemptNotFound,

    /// The cached attempt no longer matches reality; the flow must start over.
    #[error("OAuth attempt is no longer valid, start over")]
    OAuthAttemptInvalidated,

    /// More sign-up input is needed before the attempt can complete.
    #[error("Required fields missing: {fields:?} (code required: {code_required})")]
    RequiredFieldsMissing {
        /// Fields still absent after merging provider and caller data
        fields: Vec<SignUpField>,
        /// Whether a verification code must also be submitted
        code_required: bool,
    },

    /// A code was requested for an attempt whose email is already provider-verified.
    #[error("OAuth attempt does not require a verification code")]
    OAuthCodeNotRequired,

    /// The identity provider refused the authorization code.
    #[error("OAuth provider rejected the request with status {status}")]
    OAuthProviderRejected {
        /// HTTP status returned by the provider
        status: u16,
    },

    /// The identity provider could not be reached or answered with a server error.
    #[error("OAuth provider is unavailable")]
    OAuthProviderUnavailable,

    // ═══════════════════════════════════════════════════════════
    // Account Errors
    // ═══════════════════════════════════════════════════════════

    /// Email/password combination is wrong (or the account has no password).
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Email already belongs to another account.
    #[error("Email address is already taken")]
    EmailAlreadyTaken,

    /// The referenced account does not exist.
    #[error("User not found")]
    UserNotFound,

    /// The code was persisted but could not be delivered.
    #[error("Failed to deliver code: {0}")]
    NotificationFailed(String),

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Key-value or directory backend failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A stored record could not be decoded.
    #[error("Corrupt record at '{key}': {reason}")]
    CorruptRecord {
        /// Store key of the record
        key: String,
        /// Decoder message
        reason: String,
    },

    /// Invalid configuration (e.g. missing signing secret).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error (should not be exposed to users).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Returns `true` if the end user can resolve this error themselves
    /// (wait, request a new code, supply more data, log in again).
    ///
    /// # Examples
    ///
    /// ```
    /// # use federated_auth::AuthError;
    /// assert!(AuthError::CodeIncorrect { attempts_left: 2 }.is_user_actionable());
    /// assert!(!AuthError::Store("timeout".into()).is_user_actionable());
    /// ```
    #[must_use]
    pub const fn is_user_actionable(&self) -> bool {
        !self.is_system_error()
    }

    /// Returns `true` if this error indicates possible tampering or token leakage.
    ///
    /// # Examples
    ///
    /// ```
    /// # use federated_auth::AuthError;
    /// assert!(AuthError::SessionSignatureMismatch.is_security_issue());
    /// assert!(!AuthError::SessionNotFoundOrExpired.is_security_issue());
    /// ```
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(
            self,
            Self::TokenSignatureInvalid { .. }
                | Self::TokenPayloadInvalid { .. }
                | Self::SessionSignatureMismatch
        )
    }

    /// Returns `true` for failures of the system rather than of the request.
    #[must_use]
    pub const fn is_system_error(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::CorruptRecord { .. } | Self::Configuration(_) | Self::Internal(_)
        )
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(e: redis::RedisError) -> Self {
        Self::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_is_recoverable_not_tampering() {
        let err = AuthError::TokenExpired {
            token_type: TokenType::Access,
            expired_at: Utc::now(),
        };
        assert!(err.is_user_actionable());
        assert!(!err.is_security_issue());
    }

    #[test]
    fn test_corrupt_record_is_system_error() {
        let err = AuthError::CorruptRecord {
            key: "code:sign-up:a@b.c".to_string(),
            reason: "expected value".to_string(),
        };
        assert!(err.is_system_error());
        assert!(!err.is_user_actionable());
    }

    #[test]
    fn test_messages_carry_hints() {
        let err = AuthError::CodeIncorrect { attempts_left: 1 };
        assert_eq!(err.to_string(), "Incorrect code, 1 attempts left");

        let err = AuthError::TokenPayloadInvalid {
            token_type: TokenType::Refresh,
        };
        assert_eq!(err.to_string(), "refresh token payload is invalid");
    }
}
