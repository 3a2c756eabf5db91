//! OAuth attempt coordinator.
//!
//! Reconciles a provider identity with local accounts. A callback either logs
//! the user in immediately or parks the flow in an attempt record at
//! `oauth-attempt:<attemptId>`:
//!
//! ```text
//! callback ─┬─ provider already linked ─────────────────────► logged in
//!           ├─ email matches account ─┬─ provider verified ──► link + logged in
//!           │                         └─ unverified ─────────► sign-in attempt
//!           └─ no account ────────────┬─ complete + verified ► register + logged in
//!                                     └─ otherwise ──────────► sign-up attempt
//! ```
//!
//! Attempts are completed with a code (sign-in) or with the missing fields and
//! possibly a code (sign-up). Every completion re-reads the directory first;
//! if the world moved on since the callback the attempt is dropped and the
//! caller must start over.

use crate::code::{ActionKey, CodeEngine, normalize};
use crate::config::{OAuthConfig, ttl_secs};
use crate::error::{AuthError, Result};
use crate::providers::{
    CodePurpose, KeyValueStore, NewUser, ProviderLink, ProviderProfile, User, UserDirectory,
};
use crate::record;
use crate::session::SessionIssuer;
use crate::state::{AttemptId, AuthSuccess, ClientInfo, OAuthProvider, Role, SignUpField, UserId};
use serde::{Deserialize, Serialize};

/// Stored state of an unfinished OAuth flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AttemptRecord {
    /// Provider identity matches an existing account by unverified email.
    SignIn(SignInAttempt),
    /// Provider identity matches nothing; an account is being assembled.
    SignUp(SignUpAttempt),
}

/// Pending link of a provider to an existing account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInAttempt {
    /// Provider name.
    pub provider: OAuthProvider,
    /// User ID at the provider.
    pub provider_user_id: String,
    /// Account the provider will be linked to.
    pub user_id: UserId,
    /// Account email at callback time; the code goes here.
    pub email: String,
}

/// Pending registration through a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpAttempt {
    /// Provider name.
    pub provider: OAuthProvider,
    /// User ID at the provider.
    pub provider_user_id: String,
    /// Email from the provider.
    pub email: Option<String>,
    /// Whether the provider vouches for `email`.
    pub email_verified: bool,
    /// Given name from the provider.
    pub first_name: Option<String>,
    /// Family name from the provider.
    pub last_name: Option<String>,
    /// Avatar URL from the provider.
    pub avatar_url: Option<String>,
    /// Fields the caller supplied in earlier completion rounds.
    #[serde(default)]
    pub supplied: SignUpInput,
}

impl SignUpAttempt {
    fn link(&self) -> ProviderLink {
        ProviderLink {
            provider: self.provider,
            provider_user_id: self.provider_user_id.clone(),
        }
    }
}

/// Caller-supplied sign-up fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpInput {
    /// Email.
    pub email: Option<String>,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
}

/// Result of an OAuth callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum OAuthOutcome {
    /// Tokens were issued.
    LoggedIn(AuthSuccess),

    /// A code must be requested and submitted before the provider is linked.
    #[serde(rename_all = "camelCase")]
    SignIn {
        /// Attempt to continue.
        attempt_id: AttemptId,
        /// Account email the code will be sent to.
        email: String,
    },

    /// More sign-up input is needed.
    #[serde(rename_all = "camelCase")]
    SignUp {
        /// Attempt to continue.
        attempt_id: AttemptId,
        /// Required fields the provider did not supply.
        missing_fields: Vec<SignUpField>,
        /// Whether the provider vouches for its email.
        email_verified: bool,
        /// Whether completion needs a code sent to the chosen email.
        code_required: bool,
    },
}

/// A code to be delivered by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDelivery {
    /// Recipient.
    pub to: String,
    /// The code.
    pub code: String,
    /// Purpose, for the notification.
    pub purpose: CodePurpose,
}

/// Merged provider and caller data for a sign-up attempt.
struct ResolvedSignUp {
    email: Option<String>,
    email_verified: bool,
    first_name: Option<String>,
    last_name: Option<String>,
}

impl ResolvedSignUp {
    fn missing(&self, required: &[SignUpField]) -> Vec<SignUpField> {
        required
            .iter()
            .copied()
            .filter(|field| match field {
                SignUpField::Email => self.email.is_none(),
                SignUpField::FirstName => self.first_name.is_none(),
                SignUpField::LastName => self.last_name.is_none(),
            })
            .collect()
    }
}

/// Blank strings count as absent.
fn present(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// A provider-verified email is authoritative; otherwise the caller's value
/// wins over the provider's, field by field.
fn resolve(attempt: &SignUpAttempt, input: &SignUpInput) -> ResolvedSignUp {
    let provider_email = present(attempt.email.as_deref());
    let (email, email_verified) = match provider_email {
        Some(email) if attempt.email_verified => (Some(email), true),
        provider_email => (
            present(input.email.as_deref())
                .or_else(|| present(attempt.supplied.email.as_deref()))
                .or(provider_email),
            false,
        ),
    };
    let pick = |caller: &Option<String>, earlier: &Option<String>, provider: &Option<String>| {
        present(caller.as_deref())
            .or_else(|| present(earlier.as_deref()))
            .or_else(|| present(provider.as_deref()))
    };

    ResolvedSignUp {
        email,
        email_verified,
        first_name: pick(&input.first_name, &attempt.supplied.first_name, &attempt.first_name),
        last_name: pick(&input.last_name, &attempt.supplied.last_name, &attempt.last_name),
    }
}

/// OAuth attempt coordinator.
#[derive(Clone)]
pub struct OAuthCoordinator<K: KeyValueStore, U: UserDirectory> {
    kv: K,
    users: U,
    codes: CodeEngine<K>,
    issuer: SessionIssuer<K>,
    config: OAuthConfig,
}

impl<K: KeyValueStore, U: UserDirectory> OAuthCoordinator<K, U> {
    /// Create a coordinator.
    #[must_use]
    pub const fn new(
        kv: K,
        users: U,
        codes: CodeEngine<K>,
        issuer: SessionIssuer<K>,
        config: OAuthConfig,
    ) -> Self {
        Self {
            kv,
            users,
            codes,
            issuer,
            config,
        }
    }

    fn key(attempt_id: AttemptId) -> String {
        format!("oauth-attempt:{attempt_id}")
    }

    async fn save(&self, attempt_id: AttemptId, attempt: &AttemptRecord) -> Result<()> {
        let key = Self::key(attempt_id);
        self.kv
            .set_ex(
                &key,
                &record::encode(&key, attempt)?,
                ttl_secs(self.config.attempt_ttl),
            )
            .await
    }

    /// Load an attempt.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::OAuthAttemptNotFound`] if absent or expired, or a
    /// store error.
    pub async fn load(&self, attempt_id: AttemptId) -> Result<AttemptRecord> {
        let key = Self::key(attempt_id);
        record::decode_opt(&key, self.kv.get(&key).await?)?.ok_or(AuthError::OAuthAttemptNotFound)
    }

    async fn load_sign_in(&self, attempt_id: AttemptId) -> Result<SignInAttempt> {
        match self.load(attempt_id).await? {
            AttemptRecord::SignIn(attempt) => Ok(attempt),
            AttemptRecord::SignUp(_) => Err(AuthError::OAuthAttemptNotFound),
        }
    }

    async fn load_sign_up(&self, attempt_id: AttemptId) -> Result<SignUpAttempt> {
        match self.load(attempt_id).await? {
            AttemptRecord::SignUp(attempt) => Ok(attempt),
            AttemptRecord::SignIn(_) => Err(AuthError::OAuthAttemptNotFound),
        }
    }

    async fn abandon(&self, attempt_id: AttemptId, reason: &str) -> AuthError {
        tracing::warn!(attempt_id = %attempt_id, reason = %reason, "OAuth attempt invalidated");
        match self.kv.del(&Self::key(attempt_id)).await {
            Ok(()) => AuthError::OAuthAttemptInvalidated,
            Err(e) => e,
        }
    }

    /// Route a provider profile to login, a sign-in attempt or a sign-up attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the directory, store or token issuance fails.
    pub async fn handle_callback(
        &self,
        profile: ProviderProfile,
        client: &ClientInfo,
    ) -> Result<OAuthOutcome> {
        let link = profile.link();

        if let Some(user) = self.users.find_by_provider(&link).await? {
            tracing::info!(user_id = %user.id, provider = %link.provider, "OAuth login");
            return Ok(OAuthOutcome::LoggedIn(self.issuer.start(&user, client).await?));
        }

        let email = present(profile.email.as_deref()).map(|email| normalize(&email));

        let existing = match &email {
            Some(email) => self.users.find_by_email(email).await?,
            None => None,
        };
        if let Some(user) = existing {
            if profile.email_verified {
                self.users.link_provider(user.id, link.clone()).await?;
                tracing::info!(
                    user_id = %user.id,
                    provider = %link.provider,
                    "Linked provider to existing account by verified email"
                );
                return Ok(OAuthOutcome::LoggedIn(self.issuer.start(&user, client).await?));
            }

            let attempt_id = AttemptId::new();
            let attempt = SignInAttempt {
                provider: link.provider,
                provider_user_id: link.provider_user_id,
                user_id: user.id,
                email: user.email.clone(),
            };
            self.save(attempt_id, &AttemptRecord::SignIn(attempt)).await?;
            tracing::debug!(attempt_id = %attempt_id, user_id = %user.id, "Created OAuth sign-in attempt");
            return Ok(OAuthOutcome::SignIn {
                attempt_id,
                email: user.email,
            });
        }

        let attempt = SignUpAttempt {
            provider: profile.provider,
            provider_user_id: profile.provider_user_id,
            email,
            email_verified: profile.email_verified,
            first_name: present(profile.first_name.as_deref()),
            last_name: present(profile.last_name.as_deref()),
            avatar_url: profile.avatar_url,
            supplied: SignUpInput::default(),
        };
        let resolved = resolve(&attempt, &SignUpInput::default());
        let missing_fields = resolved.missing(&self.config.required_fields);

        if missing_fields.is_empty() && resolved.email_verified {
            let user = self.register(&attempt, resolved).await?;
            return Ok(OAuthOutcome::LoggedIn(self.issuer.start(&user, client).await?));
        }

        let attempt_id = AttemptId::new();
        let email_verified = resolved.email_verified;
        self.save(attempt_id, &AttemptRecord::SignUp(attempt)).await?;
        tracing::debug!(
            attempt_id = %attempt_id,
            missing = ?missing_fields,
            "Created OAuth sign-up attempt"
        );
        Ok(OAuthOutcome::SignUp {
            attempt_id,
            missing_fields,
            email_verified,
            code_required: !email_verified,
        })
    }

    /// Issue the code that confirms a sign-in attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the attempt is gone or code issuance is throttled.
    pub async fn sign_in_attempt_code(&self, attempt_id: AttemptId) -> Result<CodeDelivery> {
        let attempt = self.load_sign_in(attempt_id).await?;
        let code = self
            .codes
            .create_code(&ActionKey::oauth_sign_in(attempt_id))
            .await?;
        Ok(CodeDelivery {
            to: attempt.email,
            code,
            purpose: CodePurpose::OAuthSignIn,
        })
    }

    /// Issue the code that confirms the email of a sign-up attempt.
    ///
    /// `email` overrides an unverified provider email.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The attempt is gone → `AuthError::OAuthAttemptNotFound`
    /// - The provider already verified the email → `AuthError::OAuthCodeNotRequired`
    /// - No email is known → `AuthError::RequiredFieldsMissing`
    /// - The email belongs to an account → `AuthError::EmailAlreadyTaken`
    /// - Code issuance is throttled
    pub async fn sign_up_attempt_code(
        &self,
        attempt_id: AttemptId,
        email: Option<&str>,
    ) -> Result<CodeDelivery> {
        let attempt = self.load_sign_up(attempt_id).await?;
        let input = SignUpInput {
            email: email.map(str::to_string),
            ..SignUpInput::default()
        };
        let resolved = resolve(&attempt, &input);
        if resolved.email_verified {
            return Err(AuthError::OAuthCodeNotRequired);
        }
        let Some(email) = resolved.email else {
            return Err(AuthError::RequiredFieldsMissing {
                fields: vec![SignUpField::Email],
                code_required: true,
            });
        };
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyTaken);
        }

        let code = self
            .codes
            .create_code(&ActionKey::oauth_sign_up(attempt_id, &email))
            .await?;
        Ok(CodeDelivery {
            to: email,
            code,
            purpose: CodePurpose::OAuthSignUp,
        })
    }

    /// Finish a sign-in attempt: verify the code, link the provider, log in.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The attempt is gone → `AuthError::OAuthAttemptNotFound`
    /// - The provider got linked or the account changed meanwhile → `AuthError::OAuthAttemptInvalidated`
    /// - The code is rejected (see [`CodeEngine::verify_code`])
    pub async fn complete_sign_in(
        &self,
        attempt_id: AttemptId,
        code: &str,
        client: &ClientInfo,
    ) -> Result<AuthSuccess> {
        let attempt = self.load_sign_in(attempt_id).await?;
        let link = ProviderLink {
            provider: attempt.provider,
            provider_user_id: attempt.provider_user_id.clone(),
        };

        let (linked, account) = tokio::join!(
            self.users.find_by_provider(&link),
            self.users.find_by_id(attempt.user_id)
        );
        if linked?.is_some() {
            return Err(self.abandon(attempt_id, "provider identity already linked").await);
        }
        let user = match account? {
            Some(user) if user.email == attempt.email => user,
            _ => return Err(self.abandon(attempt_id, "account changed or removed").await),
        };

        self.codes
            .verify_code(&ActionKey::oauth_sign_in(attempt_id), code)
            .await?;

        self.kv.del(&Self::key(attempt_id)).await?;
        self.users.link_provider(user.id, link).await?;
        tracing::info!(user_id = %user.id, provider = %attempt.provider, "Linked provider after code check");
        self.issuer.start(&user, client).await
    }

    /// Finish a sign-up attempt: merge fields, verify the code if needed,
    /// create the account and log in.
    ///
    /// Supplied fields are remembered when the attempt is still incomplete.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The attempt is gone → `AuthError::OAuthAttemptNotFound`
    /// - Fields or the code are still missing → `AuthError::RequiredFieldsMissing`
    /// - The provider or email got claimed meanwhile → `AuthError::OAuthAttemptInvalidated`
    /// - The code is rejected (see [`CodeEngine::verify_code`])
    pub async fn complete_sign_up(
        &self,
        attempt_id: AttemptId,
        input: SignUpInput,
        code: Option<&str>,
        client: &ClientInfo,
    ) -> Result<AuthSuccess> {
        let mut attempt = self.load_sign_up(attempt_id).await?;
        let resolved = resolve(&attempt, &input);
        let missing = resolved.missing(&self.config.required_fields);
        let code_required = !resolved.email_verified;

        if !missing.is_empty() || (code_required && code.is_none()) {
            attempt.supplied = SignUpInput {
                email: present(input.email.as_deref()).or(attempt.supplied.email),
                first_name: present(input.first_name.as_deref()).or(attempt.supplied.first_name),
                last_name: present(input.last_name.as_deref()).or(attempt.supplied.last_name),
            };
            let key = Self::key(attempt_id);
            self.kv
                .set_keep_ttl(&key, &record::encode(&key, &AttemptRecord::SignUp(attempt))?)
                .await?;
            return Err(AuthError::RequiredFieldsMissing {
                fields: missing,
                code_required,
            });
        }
        let Some(email) = resolved.email.clone() else {
            return Err(AuthError::Internal("resolved sign-up lost its email".to_string()));
        };

        let link = attempt.link();
        let (linked, taken) = tokio::join!(
            self.users.find_by_provider(&link),
            self.users.find_by_email(&email)
        );
        if linked?.is_some() {
            return Err(self.abandon(attempt_id, "provider identity already linked").await);
        }
        if taken?.is_some() {
            return Err(self.abandon(attempt_id, "email already registered").await);
        }

        if let Some(code) = code.filter(|_| code_required) {
            self.codes
                .verify_code(&ActionKey::oauth_sign_up(attempt_id, &email), code)
                .await?;
        }

        self.kv.del(&Self::key(attempt_id)).await?;
        let user = self.register(&attempt, resolved).await?;
        self.issuer.start(&user, client).await
    }

    async fn register(&self, attempt: &SignUpAttempt, resolved: ResolvedSignUp) -> Result<User> {
        let Some(email) = resolved.email else {
            return Err(AuthError::RequiredFieldsMissing {
                fields: vec![SignUpField::Email],
                code_required: !resolved.email_verified,
            });
        };
        let user = self
            .users
            .create(NewUser {
                email,
                first_name: resolved.first_name,
                last_name: resolved.last_name,
                password_hash: None,
                role: Role::User,
                avatar_url: attempt.avatar_url.clone(),
                provider: Some(attempt.link()),
            })
            .await?;
        tracing::info!(
            user_id = %user.id,
            provider = %attempt.provider,
            "Created account through OAuth"
        );
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(email: Option<&str>, verified: bool) -> SignUpAttempt {
        SignUpAttempt {
            provider: OAuthProvider::GitHub,
            provider_user_id: "42".into(),
            email: email.map(str::to_string),
            email_verified: verified,
            first_name: Some("Provider".into()),
            last_name: None,
            avatar_url: None,
            supplied: SignUpInput::default(),
        }
    }

    #[test]
    fn test_verified_provider_email_is_authoritative() {
        let input = SignUpInput {
            email: Some("other@example.com".into()),
            ..SignUpInput::default()
        };
        let resolved = resolve(&attempt(Some("x@example.com"), true), &input);
        assert_eq!(resolved.email.as_deref(), Some("x@example.com"));
        assert!(resolved.email_verified);
    }

    #[test]
    fn test_caller_overrides_unverified_values() {
        let input = SignUpInput {
            email: Some("mine@example.com".into()),
            first_name: Some("Ada".into()),
            last_name: Some("  ".into()),
        };
        let resolved = resolve(&attempt(Some("x@example.com"), false), &input);
        assert_eq!(resolved.email.as_deref(), Some("mine@example.com"));
        assert!(!resolved.email_verified);
        assert_eq!(resolved.first_name.as_deref(), Some("Ada"));
        assert_eq!(resolved.last_name, None);
    }

    #[test]
    fn test_missing_follows_required_order() {
        let resolved = resolve(&attempt(None, false), &SignUpInput::default());
        assert_eq!(
            resolved.missing(&[SignUpField::FirstName, SignUpField::LastName, SignUpField::Email]),
            vec![SignUpField::LastName, SignUpField::Email]
        );
    }

    #[test]
    fn test_outcome_wire_shape() {
        let attempt_id = AttemptId::new();
        let outcome = OAuthOutcome::SignUp {
            attempt_id,
            missing_fields: vec![SignUpField::FirstName, SignUpField::LastName],
            email_verified: false,
            code_required: true,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["method"], "sign-up");
        assert_eq!(json["missingFields"], serde_json::json!(["firstName", "lastName"]));
        assert_eq!(json["emailVerified"], false);
        assert_eq!(json["attemptId"], attempt_id.to_string());
    }

    #[test]
    fn test_attempt_record_is_tagged() {
        let record = AttemptRecord::SignUp(attempt(None, false));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "sign-up");
        assert_eq!(json["providerUserId"], "42");
        let back: AttemptRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
