//! Authentication configuration.
//!
//! Every lifetime, capacity and policy value used by the core lives here.
//! Values are supplied by the application (or loaded with
//! [`AuthConfig::from_env`]) and are never hardcoded at call sites.

use crate::error::{AuthError, Result};
use crate::state::{OAuthProvider, SignUpField};
use chrono::Duration;
use std::collections::HashMap;
use std::env;

/// Convert a configured lifetime to whole seconds for the store, never below one.
pub(crate) fn ttl_secs(duration: Duration) -> u64 {
    u64::try_from(duration.num_seconds()).unwrap_or(0).max(1)
}

// ═══════════════════════════════════════════════════════════════════════
// Tokens
// ═══════════════════════════════════════════════════════════════════════

/// Signing secrets and token lifetimes.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// HMAC secret for access tokens.
    pub access_secret: String,

    /// HMAC secret for refresh tokens. Must differ from `access_secret`.
    pub refresh_secret: String,

    /// Access token lifetime.
    ///
    /// Default: 5 minutes
    pub access_ttl: Duration,

    /// Refresh token lifetime. Also the lifetime of the bound session.
    ///
    /// Default: 14 days
    pub refresh_ttl: Duration,
}

impl TokenConfig {
    /// Create token configuration with default lifetimes.
    #[must_use]
    pub const fn new(access_secret: String, refresh_secret: String) -> Self {
        Self {
            access_secret,
            refresh_secret,
            access_ttl: Duration::minutes(5),
            refresh_ttl: Duration::days(14),
        }
    }

    /// Set access token lifetime.
    #[must_use]
    pub const fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    /// Set refresh token lifetime.
    #[must_use]
    pub const fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::new(String::new(), String::new())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════════════

/// What happens when a user already holds the maximum number of sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionOverflow {
    /// Drop the session with the oldest creation time.
    #[default]
    EvictOldest,
    /// Refuse the new session with `MaxSessionsExceeded`.
    Reject,
}

/// Per-user session limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum concurrent sessions per user.
    ///
    /// Default: 5
    pub max_sessions: usize,

    /// Overflow policy.
    ///
    /// Default: [`SessionOverflow::EvictOldest`]
    pub overflow: SessionOverflow,

    /// Minimum age a session must reach before it may sign out other sessions.
    ///
    /// Default: none
    pub revoke_others_min_age: Option<Duration>,
}

impl SessionConfig {
    /// Create session configuration.
    #[must_use]
    pub const fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            overflow: SessionOverflow::EvictOldest,
            revoke_others_min_age: None,
        }
    }

    /// Set overflow policy.
    #[must_use]
    pub const fn with_overflow(mut self, overflow: SessionOverflow) -> Self {
        self.overflow = overflow;
        self
    }

    /// Require sessions to reach `age` before revoking others.
    #[must_use]
    pub const fn with_revoke_others_min_age(mut self, age: Duration) -> Self {
        self.revoke_others_min_age = Some(age);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// One-Time Codes
// ═══════════════════════════════════════════════════════════════════════

/// One-time code generation, validity and request throttling.
#[derive(Debug, Clone)]
pub struct CodeConfig {
    /// Number of digits.
    ///
    /// Default: 6
    pub length: u32,

    /// How long a code can be verified after it was issued.
    ///
    /// Default: 5 minutes
    pub validity: Duration,

    /// Verification attempts per issued code.
    ///
    /// Default: 3
    pub max_attempts: u32,

    /// Minimum wait before the n-th request (index 0 is the first request).
    /// Requests beyond the schedule wait `record_ttl`.
    ///
    /// Default: 0s, 30s, 60s, 120s, 300s
    pub request_intervals: Vec<Duration>,

    /// Lifetime of the request bookkeeping; after it the request count resets.
    ///
    /// Default: 2 hours
    pub record_ttl: Duration,
}

impl CodeConfig {
    /// Set code length.
    #[must_use]
    pub const fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    /// Set code validity window.
    #[must_use]
    pub const fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Set verification attempts per code.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the escalating request schedule.
    #[must_use]
    pub fn with_request_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.request_intervals = intervals;
        self
    }

    /// Set the bookkeeping record lifetime.
    #[must_use]
    pub const fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// Required wait before request number `request_number` (1-based).
    #[must_use]
    pub fn interval_for(&self, request_number: u32) -> Duration {
        usize::try_from(request_number.saturating_sub(1))
            .ok()
            .and_then(|index| self.request_intervals.get(index).copied())
            .unwrap_or(self.record_ttl)
    }
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            length: 6,
            validity: Duration::minutes(5),
            max_attempts: 3,
            request_intervals: vec![
                Duration::zero(),
                Duration::seconds(30),
                Duration::seconds(60),
                Duration::seconds(120),
                Duration::seconds(300),
            ],
            record_ttl: Duration::hours(2),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// OAuth
// ═══════════════════════════════════════════════════════════════════════

/// Client registration with one identity provider.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: String,

    /// Authorization code exchange endpoint.
    pub token_url: String,

    /// Profile endpoint (unused for providers that return an ID token).
    pub user_data_url: String,

    /// Redirect URI sent with the exchange, if the provider requires one.
    pub redirect_uri: Option<String>,
}

impl OAuthClientConfig {
    /// Google client with its standard endpoints.
    #[must_use]
    pub fn google(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            user_data_url: "https://www.googleapis.com/oauth2/v3/userinfo".to_string(),
            redirect_uri: Some(redirect_uri),
        }
    }

    /// GitHub client with its standard endpoints.
    #[must_use]
    pub fn github(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            user_data_url: "https://api.github.com/user".to_string(),
            redirect_uri: Some(redirect_uri),
        }
    }

    /// Yandex client with its standard endpoints (no redirect URI on exchange).
    #[must_use]
    pub fn yandex(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
            token_url: "https://oauth.yandex.ru/token".to_string(),
            user_data_url: "https://login.yandex.ru/info".to_string(),
            redirect_uri: None,
        }
    }

    /// Override the endpoints (e.g. to point at a local stub server).
    #[must_use]
    pub fn with_endpoints(mut self, token_url: String, user_data_url: String) -> Self {
        self.token_url = token_url;
        self.user_data_url = user_data_url;
        self
    }
}

/// OAuth linking policy and provider registrations.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Lifetime of an unfinished sign-in/sign-up attempt.
    ///
    /// Default: 30 minutes
    pub attempt_ttl: Duration,

    /// Fields an account must have before an OAuth sign-up completes.
    ///
    /// Default: first name, last name, email
    pub required_fields: Vec<SignUpField>,

    /// Registered provider clients.
    pub clients: HashMap<OAuthProvider, OAuthClientConfig>,
}

impl OAuthConfig {
    /// Set attempt lifetime.
    #[must_use]
    pub const fn with_attempt_ttl(mut self, ttl: Duration) -> Self {
        self.attempt_ttl = ttl;
        self
    }

    /// Set required sign-up fields.
    #[must_use]
    pub fn with_required_fields(mut self, fields: Vec<SignUpField>) -> Self {
        self.required_fields = fields;
        self
    }

    /// Register a provider client.
    #[must_use]
    pub fn with_client(mut self, provider: OAuthProvider, client: OAuthClientConfig) -> Self {
        self.clients.insert(provider, client);
        self
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            attempt_ttl: Duration::minutes(30),
            required_fields: vec![
                SignUpField::FirstName,
                SignUpField::LastName,
                SignUpField::Email,
            ],
            clients: HashMap::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Top Level
// ═══════════════════════════════════════════════════════════════════════

/// Complete authentication configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Token secrets and lifetimes.
    pub tokens: TokenConfig,
    /// Session limits.
    pub sessions: SessionConfig,
    /// One-time code policy.
    pub codes: CodeConfig,
    /// OAuth policy and clients.
    pub oauth: OAuthConfig,
}

impl AuthConfig {
    /// Create configuration with the given secrets and defaults elsewhere.
    #[must_use]
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            tokens: TokenConfig::new(access_secret.into(), refresh_secret.into()),
            ..Self::default()
        }
    }

    /// Load configuration from `AUTH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if a variable cannot be parsed or
    /// the resulting configuration fails [`AuthConfig::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`AuthConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let secs = |name: &str, default: Duration| -> Result<Duration> {
            lookup(name).map_or(Ok(default), |raw| {
                raw.trim()
                    .parse::<i64>()
                    .map(Duration::seconds)
                    .map_err(|e| AuthError::Configuration(format!("{name}: {e}")))
            })
        };
        let number = |name: &str, default: u64| -> Result<u64> {
            lookup(name).map_or(Ok(default), |raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| AuthError::Configuration(format!("{name}: {e}")))
            })
        };

        let defaults = Self::default();

        let tokens = TokenConfig {
            access_secret: lookup("AUTH_ACCESS_TOKEN_SECRET").unwrap_or_default(),
            refresh_secret: lookup("AUTH_REFRESH_TOKEN_SECRET").unwrap_or_default(),
            access_ttl: secs("AUTH_ACCESS_TOKEN_TTL_SECS", defaults.tokens.access_ttl)?,
            refresh_ttl: secs("AUTH_REFRESH_TOKEN_TTL_SECS", defaults.tokens.refresh_ttl)?,
        };

        let overflow = match lookup("AUTH_SESSION_OVERFLOW").as_deref().map(str::trim) {
            None | Some("evict") => SessionOverflow::EvictOldest,
            Some("reject") => SessionOverflow::Reject,
            Some(other) => {
                return Err(AuthError::Configuration(format!(
                    "AUTH_SESSION_OVERFLOW: expected 'evict' or 'reject', got '{other}'"
                )));
            }
        };
        let sessions = SessionConfig {
            max_sessions: usize::try_from(number("AUTH_MAX_SESSIONS", 5)?)
                .map_err(|e| AuthError::Configuration(format!("AUTH_MAX_SESSIONS: {e}")))?,
            overflow,
            revoke_others_min_age: lookup("AUTH_SESSION_REVOKE_MIN_AGE_SECS")
                .map(|_| secs("AUTH_SESSION_REVOKE_MIN_AGE_SECS", Duration::zero()))
                .transpose()?,
        };

        let request_intervals = match lookup("AUTH_CODE_REQUEST_INTERVALS_SECS") {
            None => defaults.codes.request_intervals,
            Some(raw) => raw
                .split(',')
                .map(|part| {
                    part.trim().parse::<i64>().map(Duration::seconds).map_err(|e| {
                        AuthError::Configuration(format!("AUTH_CODE_REQUEST_INTERVALS_SECS: {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };
        let codes = CodeConfig {
            length: u32::try_from(number("AUTH_CODE_LENGTH", 6)?)
                .map_err(|e| AuthError::Configuration(format!("AUTH_CODE_LENGTH: {e}")))?,
            validity: secs("AUTH_CODE_VALIDITY_SECS", defaults.codes.validity)?,
            max_attempts: u32::try_from(number("AUTH_CODE_MAX_ATTEMPTS", 3)?)
                .map_err(|e| AuthError::Configuration(format!("AUTH_CODE_MAX_ATTEMPTS: {e}")))?,
            request_intervals,
            record_ttl: secs("AUTH_CODE_RECORD_TTL_SECS", defaults.codes.record_ttl)?,
        };

        let required_fields = match lookup("AUTH_OAUTH_REQUIRED_FIELDS") {
            None => defaults.oauth.required_fields,
            Some(raw) => raw
                .split(',')
                .map(|part| part.parse::<SignUpField>().map_err(AuthError::Configuration))
                .collect::<Result<Vec<_>>>()?,
        };
        let redirect_base = lookup("AUTH_OAUTH_REDIRECT_BASE_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        let redirect = |provider: OAuthProvider| {
            format!("{redirect_base}/auth/oauth-callback?providerName={provider}")
        };

        let mut clients = HashMap::new();
        if let (Some(id), Some(secret)) = (
            lookup("AUTH_GOOGLE_CLIENT_ID"),
            lookup("AUTH_GOOGLE_CLIENT_SECRET"),
        ) {
            clients.insert(
                OAuthProvider::Google,
                OAuthClientConfig::google(id, secret, redirect(OAuthProvider::Google)),
            );
        }
        if let (Some(id), Some(secret)) = (
            lookup("AUTH_GITHUB_CLIENT_ID"),
            lookup("AUTH_GITHUB_CLIENT_SECRET"),
        ) {
            clients.insert(
                OAuthProvider::GitHub,
                OAuthClientConfig::github(id, secret, redirect(OAuthProvider::GitHub)),
            );
        }
        if let (Some(id), Some(secret)) = (
            lookup("AUTH_YANDEX_CLIENT_ID"),
            lookup("AUTH_YANDEX_CLIENT_SECRET"),
        ) {
            clients.insert(OAuthProvider::Yandex, OAuthClientConfig::yandex(id, secret));
        }

        let oauth = OAuthConfig {
            attempt_ttl: secs("AUTH_OAUTH_ATTEMPT_TTL_SECS", defaults.oauth.attempt_ttl)?,
            required_fields,
            clients,
        };

        let config = Self {
            tokens,
            sessions,
            codes,
            oauth,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(AuthError::Configuration(msg.to_string()));

        if self.tokens.access_secret.is_empty() || self.tokens.refresh_secret.is_empty() {
            return fail("access and refresh token secrets must be set");
        }
        if self.tokens.access_secret == self.tokens.refresh_secret {
            return fail("access and refresh token secrets must differ");
        }
        if self.tokens.access_ttl <= Duration::zero() || self.tokens.refresh_ttl <= Duration::zero()
        {
            return fail("token lifetimes must be positive");
        }
        if self.sessions.max_sessions == 0 {
            return fail("max_sessions must be at least 1");
        }
        if !(4..=9).contains(&self.codes.length) {
            return fail("code length must be between 4 and 9 digits");
        }
        if self.codes.max_attempts == 0 {
            return fail("codes need at least one verification attempt");
        }
        if self.codes.validity > self.codes.record_ttl {
            return fail("code validity must not exceed the code record lifetime");
        }
        if self.codes.request_intervals.iter().any(|i| *i < Duration::zero()) {
            return fail("code request intervals must not be negative");
        }
        if self.oauth.attempt_ttl <= Duration::zero() {
            return fail("OAuth attempt lifetime must be positive");
        }
        if !self.oauth.required_fields.contains(&SignUpField::Email) {
            return fail("OAuth required fields must include email");
        }
        Ok(())
    }
}
