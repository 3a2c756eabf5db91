//! Access and refresh token issuance and verification.
//!
//! Tokens are HS512 JWTs signed with separate secrets per token type.
//! Expiry is checked against the injected [`Clock`] rather than by the JWT
//! library, so expired-but-authentic tokens are reported as
//! [`AuthError::TokenExpired`] with their expiry instant.
//!
//! The signature segment of a refresh token is what the session store binds
//! to: a superseded refresh token still verifies cryptographically, but its
//! signature no longer matches any live session.

use crate::clock::Clock;
use crate::config::TokenConfig;
use crate::error::{AuthError, Result};
use crate::state::{Role, SessionId, TokenType, UserId};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID).
    pub sub: UserId,
    /// Session the token was minted for.
    pub sid: SessionId,
    /// Role snapshot at issuance.
    pub role: Role,
    /// Email snapshot at issuance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Token type discriminator.
    pub typ: TokenType,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expires at (unix seconds).
    pub exp: i64,
}

/// Claims carried by a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject (user ID).
    pub sub: UserId,
    /// Session the token is bound to.
    pub sid: SessionId,
    /// Token type discriminator.
    pub typ: TokenType,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expires at (unix seconds).
    pub exp: i64,
}

/// Claim shapes the issuer can verify.
pub trait TokenClaims: DeserializeOwned {
    /// Token type these claims belong to.
    const TOKEN_TYPE: TokenType;

    /// Declared token type.
    fn typ(&self) -> TokenType;
}

impl TokenClaims for AccessClaims {
    const TOKEN_TYPE: TokenType = TokenType::Access;

    fn typ(&self) -> TokenType {
        self.typ
    }
}

impl TokenClaims for RefreshClaims {
    const TOKEN_TYPE: TokenType = TokenType::Refresh;

    fn typ(&self) -> TokenType {
        self.typ
    }
}

/// A token whose signature, expiry and claim shape were all checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken<C> {
    /// Decoded claims.
    pub claims: C,
    /// Signature segment of the token.
    pub signature: String,
}

/// A signed access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Encoded JWT.
    pub token: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Everything needed to open a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshMaterial {
    /// Freshly generated session ID.
    pub session_id: SessionId,
    /// Encoded refresh JWT carrying `session_id`.
    pub refresh_token: String,
    /// Signature segment of `refresh_token`, stored with the session.
    pub token_signature: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Token issuer.
#[derive(Clone)]
pub struct TokenIssuer {
    config: TokenConfig,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_ttl", &self.config.access_ttl)
            .field("refresh_ttl", &self.config.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Create an issuer from token configuration.
    #[must_use]
    pub fn new(config: TokenConfig, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            config,
            validation,
            clock,
        }
    }

    /// Refresh token lifetime, which is also the session lifetime.
    #[must_use]
    pub const fn refresh_ttl(&self) -> chrono::Duration {
        self.config.refresh_ttl
    }

    /// Sign a short-lived access token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the signing key is unusable.
    pub fn issue_access(
        &self,
        user_id: UserId,
        session_id: SessionId,
        role: Role,
        email: Option<&str>,
    ) -> Result<AccessToken> {
        let now = self.clock.now();
        let expires_at = now + self.config.access_ttl;
        let claims = AccessClaims {
            sub: user_id,
            sid: session_id,
            role,
            email: email.map(str::to_string),
            typ: TokenType::Access,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = sign(&claims, &self.access_encoding)?;
        Ok(AccessToken { token, expires_at })
    }

    /// Generate a session ID and sign a refresh token bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the signing key is unusable.
    pub fn issue_refresh_material(&self, user_id: UserId) -> Result<RefreshMaterial> {
        let now = self.clock.now();
        let expires_at = now + self.config.refresh_ttl;
        let session_id = SessionId::new();
        let claims = RefreshClaims {
            sub: user_id,
            sid: session_id,
            typ: TokenType::Refresh,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let refresh_token = sign(&claims, &self.refresh_encoding)?;
        let token_signature = signature_of(&refresh_token).to_string();

        Ok(RefreshMaterial {
            session_id,
            refresh_token,
            token_signature,
            expires_at,
        })
    }

    /// Verify an access token.
    ///
    /// # Errors
    ///
    /// See [`TokenIssuer::verify`].
    pub fn verify_access(&self, token: &str) -> Result<VerifiedToken<AccessClaims>> {
        self.verify(token)
    }

    /// Verify a refresh token.
    ///
    /// # Errors
    ///
    /// See [`TokenIssuer::verify`].
    pub fn verify_refresh(&self, token: &str) -> Result<VerifiedToken<RefreshClaims>> {
        self.verify(token)
    }

    /// Verify signature, expiry and claim shape, in that order.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The token is malformed or signed with another key → `AuthError::TokenSignatureInvalid`
    /// - The claims do not match `C` → `AuthError::TokenPayloadInvalid`
    /// - The token is past its expiry → `AuthError::TokenExpired`
    pub fn verify<C: TokenClaims>(&self, token: &str) -> Result<VerifiedToken<C>> {
        let token_type = C::TOKEN_TYPE;
        let key = match token_type {
            TokenType::Access => &self.access_decoding,
            TokenType::Refresh => &self.refresh_decoding,
        };

        let data = jsonwebtoken::decode::<serde_json::Value>(token, key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                    AuthError::TokenPayloadInvalid { token_type }
                }
                _ => AuthError::TokenSignatureInvalid { token_type },
            })?;

        let expired_at = data
            .claims
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
            .ok_or(AuthError::TokenPayloadInvalid { token_type })?;
        if self.clock.now() >= expired_at {
            return Err(AuthError::TokenExpired {
                token_type,
                expired_at,
            });
        }

        let claims: C = serde_json::from_value(data.claims)
            .map_err(|_| AuthError::TokenPayloadInvalid { token_type })?;
        if claims.typ() != token_type {
            return Err(AuthError::TokenPayloadInvalid { token_type });
        }

        Ok(VerifiedToken {
            claims,
            signature: signature_of(token).to_string(),
        })
    }
}

fn sign<T: Serialize>(claims: &T, key: &EncodingKey) -> Result<String> {
    jsonwebtoken::encode(&Header::new(Algorithm::HS512), claims, key)
        .map_err(|e| AuthError::Configuration(format!("Failed to sign token: {e}")))
}

/// The third dot-separated segment of a compact JWT.
fn signature_of(token: &str) -> &str {
    token.rsplit('.').next().unwrap_or_default()
}
