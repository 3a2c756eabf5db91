//! Authentication orchestrator.
//!
//! [`AuthService`] composes the token issuer, session store, code engine and
//! OAuth attempt coordinator into the flows a caller exposes: password and
//! code based sign-up and sign-in, refresh rotation, session management,
//! account recovery and OAuth completion.
//!
//! Every operation returns a typed [`AuthError`] on failure. HTTP status
//! codes, cookies and request validation are the caller's concern.

use crate::clock::Clock;
use crate::code::{ActionKey, CodeEngine, normalize};
use crate::config::AuthConfig;
use crate::environment::AuthEnvironment;
use crate::error::{AuthError, Result};
use crate::oauth::{CodeDelivery, OAuthCoordinator, OAuthOutcome, SignUpInput};
use crate::providers::{
    CodePurpose, IdentityProvider, KeyValueStore, NewUser, NotificationContext, Notifier,
    PasswordHasher, User, UserDirectory,
};
use crate::session::{SessionInfo, SessionIssuer, SessionStore};
use crate::state::{AttemptId, AuthSuccess, ClientInfo, OAuthProvider, Role, SessionId, UserId};
use crate::token::{AccessClaims, TokenIssuer};
use chrono::Duration;
use constant_time_eq::constant_time_eq;
use std::net::IpAddr;
use std::sync::Arc;

/// Authentication service.
///
/// # Type Parameters
///
/// See [`AuthEnvironment`].
#[derive(Clone)]
pub struct AuthService<K, U, N, P, I>
where
    K: KeyValueStore + Clone,
    U: UserDirectory + Clone,
    N: Notifier,
    P: PasswordHasher,
    I: IdentityProvider,
{
    users: U,
    notifier: N,
    hasher: P,
    identity: I,
    clock: Arc<dyn Clock>,
    codes: CodeEngine<K>,
    issuer: SessionIssuer<K>,
    oauth: OAuthCoordinator<K, U>,
    revoke_others_min_age: Option<Duration>,
}

impl<K, U, N, P, I> AuthService<K, U, N, P, I>
where
    K: KeyValueStore + Clone,
    U: UserDirectory + Clone,
    N: Notifier,
    P: PasswordHasher,
    I: IdentityProvider,
{
    /// Build the service from its collaborators and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if `config` is inconsistent.
    pub fn new(env: AuthEnvironment<K, U, N, P, I>, config: AuthConfig) -> Result<Self> {
        config.validate()?;
        let AuthEnvironment {
            kv,
            users,
            notifier,
            hasher,
            identity,
            clock,
        } = env;

        let tokens = TokenIssuer::new(config.tokens.clone(), Arc::clone(&clock));
        let sessions = SessionStore::new(
            kv.clone(),
            &config.sessions,
            config.tokens.refresh_ttl,
            Arc::clone(&clock),
        );
        let issuer = SessionIssuer::new(tokens, sessions);
        let codes = CodeEngine::new(kv.clone(), config.codes, Arc::clone(&clock));
        let oauth = OAuthCoordinator::new(
            kv,
            users.clone(),
            codes.clone(),
            issuer.clone(),
            config.oauth,
        );

        Ok(Self {
            users,
            notifier,
            hasher,
            identity,
            clock,
            codes,
            issuer,
            oauth,
            revoke_others_min_age: config.sessions.revoke_others_min_age,
        })
    }

    /// The session store.
    #[must_use]
    pub const fn sessions(&self) -> &SessionStore<K> {
        self.issuer.sessions()
    }

    /// The token issuer.
    #[must_use]
    pub const fn tokens(&self) -> &TokenIssuer {
        self.issuer.tokens()
    }

    /// The OAuth attempt coordinator.
    #[must_use]
    pub const fn oauth(&self) -> &OAuthCoordinator<K, U> {
        &self.oauth
    }

    async fn deliver(&self, to: &str, code: &str, purpose: CodePurpose, ip: IpAddr) -> Result<()> {
        let context = NotificationContext {
            purpose,
            ip,
            requested_at: self.clock.now(),
        };
        self.notifier
            .send_code(to, code, &context)
            .await
            .map_err(|e| match e {
                AuthError::NotificationFailed(_) => e,
                other => AuthError::NotificationFailed(other.to_string()),
            })
    }

    async fn issue_and_deliver(
        &self,
        action: &ActionKey,
        to: &str,
        purpose: CodePurpose,
        ip: IpAddr,
    ) -> Result<()> {
        let code = self.codes.create_code(action).await?;
        self.deliver(to, &code, purpose, ip).await
    }

    async fn require_user(&self, user_id: UserId) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn require_user_by_email(&self, email: &str) -> Result<User> {
        self.users
            .find_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Password and code credentials
    // ═══════════════════════════════════════════════════════════════════

    /// Send a sign-up code to an email that has no account yet.
    ///
    /// The code is persisted before delivery, so a delivery failure still
    /// counts against request throttling.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The email is registered → `AuthError::EmailAlreadyTaken`
    /// - Requests are throttled → `AuthError::CodeRateLimited`
    /// - Delivery fails → `AuthError::NotificationFailed`
    pub async fn request_sign_up_code(&self, email: &str, ip: IpAddr) -> Result<()> {
        let email = normalize(email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyTaken);
        }
        self.issue_and_deliver(&ActionKey::sign_up(&email), &email, CodePurpose::SignUp, ip)
            .await
    }

    /// Create a password account after checking the emailed code.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The email is registered → `AuthError::EmailAlreadyTaken`
    /// - The code is rejected (see [`CodeEngine::verify_code`])
    /// - Session creation fails
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        code: &str,
        client: &ClientInfo,
    ) -> Result<AuthSuccess> {
        let email = normalize(email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyTaken);
        }
        self.codes
            .verify_code(&ActionKey::sign_up(&email), code)
            .await?;

        let password_hash = self.hasher.hash(password)?;
        let user = self
            .users
            .create(NewUser {
                email,
                first_name: None,
                last_name: None,
                password_hash: Some(password_hash),
                role: Role::User,
                avatar_url: None,
                provider: None,
            })
            .await?;
        tracing::info!(user_id = %user.id, "Created account with password");

        self.issuer.start(&user, client).await
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for an unknown email, an
    /// account without a password, or a wrong password.
    pub async fn sign_in(&self, email: &str, password: &str, client: &ClientInfo) -> Result<AuthSuccess> {
        let user = self
            .users
            .find_by_email(&normalize(email))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let Some(hash) = user.password_hash.as_deref() else {
            return Err(AuthError::InvalidCredentials);
        };
        if !self.hasher.verify(password, hash)? {
            tracing::debug!(user_id = %user.id, "Password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        self.issuer.start(&user, client).await
    }

    /// Send a passwordless sign-in code.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No account uses the email → `AuthError::UserNotFound`
    /// - Requests are throttled → `AuthError::CodeRateLimited`
    /// - Delivery fails → `AuthError::NotificationFailed`
    pub async fn request_sign_in_code(&self, email: &str, ip: IpAddr) -> Result<()> {
        let user = self.require_user_by_email(&normalize(email)).await?;
        self.issue_and_deliver(
            &ActionKey::sign_in(&user.email),
            &user.email,
            CodePurpose::SignIn,
            ip,
        )
        .await
    }

    /// Sign in with an emailed code.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No account uses the email → `AuthError::UserNotFound`
    /// - The code is rejected (see [`CodeEngine::verify_code`])
    pub async fn sign_in_by_code(&self, email: &str, code: &str, client: &ClientInfo) -> Result<AuthSuccess> {
        let user = self.require_user_by_email(&normalize(email)).await?;
        self.codes
            .verify_code(&ActionKey::sign_in(&user.email), code)
            .await?;
        self.issuer.start(&user, client).await
    }

    /// Send a password reset code.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No account uses the email → `AuthError::UserNotFound`
    /// - Requests are throttled → `AuthError::CodeRateLimited`
    /// - Delivery fails → `AuthError::NotificationFailed`
    pub async fn request_password_reset_code(&self, email: &str, ip: IpAddr) -> Result<()> {
        let user = self.require_user_by_email(&normalize(email)).await?;
        self.issue_and_deliver(
            &ActionKey::password_reset(&user.email),
            &user.email,
            CodePurpose::PasswordReset,
            ip,
        )
        .await
    }

    /// Replace the password after checking the emailed code, then revoke
    /// every session of the account.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No account uses the email → `AuthError::UserNotFound`
    /// - The code is rejected (see [`CodeEngine::verify_code`])
    pub async fn reset_password(&self, email: &str, code: &str, new_password: &str) -> Result<()> {
        let user = self.require_user_by_email(&normalize(email)).await?;
        self.codes
            .verify_code(&ActionKey::password_reset(&user.email), code)
            .await?;

        let password_hash = self.hasher.hash(new_password)?;
        self.users.update_password(user.id, &password_hash).await?;
        self.sessions().delete_all(user.id).await?;
        tracing::info!(user_id = %user.id, "Password reset, all sessions revoked");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Account changes
    // ═══════════════════════════════════════════════════════════════════

    /// Send an ownership code to a new email address.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The account is gone → `AuthError::UserNotFound`
    /// - The new email is registered → `AuthError::EmailAlreadyTaken`
    /// - Requests are throttled → `AuthError::CodeRateLimited`
    /// - Delivery fails → `AuthError::NotificationFailed`
    pub async fn request_email_change_code(&self, user_id: UserId, new_email: &str, ip: IpAddr) -> Result<()> {
        let new_email = normalize(new_email);
        let (user, taken) = tokio::join!(
            self.users.find_by_id(user_id),
            self.users.find_by_email(&new_email)
        );
        if user?.is_none() {
            return Err(AuthError::UserNotFound);
        }
        if taken?.is_some() {
            return Err(AuthError::EmailAlreadyTaken);
        }

        self.issue_and_deliver(
            &ActionKey::email_change(user_id, &new_email),
            &new_email,
            CodePurpose::EmailChange,
            ip,
        )
        .await
    }

    /// Switch the account to a new email after checking the code sent there.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The account is gone → `AuthError::UserNotFound`
    /// - The new email got registered meanwhile → `AuthError::EmailAlreadyTaken`
    /// - The code is rejected (see [`CodeEngine::verify_code`])
    pub async fn change_email(&self, user_id: UserId, new_email: &str, code: &str) -> Result<()> {
        let new_email = normalize(new_email);
        let (user, taken) = tokio::join!(
            self.users.find_by_id(user_id),
            self.users.find_by_email(&new_email)
        );
        if user?.is_none() {
            return Err(AuthError::UserNotFound);
        }
        if taken?.is_some() {
            return Err(AuthError::EmailAlreadyTaken);
        }

        self.codes
            .verify_code(&ActionKey::email_change(user_id, &new_email), code)
            .await?;
        self.users.update_email(user_id, &new_email).await?;
        tracing::info!(user_id = %user_id, "Email changed");
        Ok(())
    }

    /// Send an account deletion code to the account's email.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The account is gone → `AuthError::UserNotFound`
    /// - Requests are throttled → `AuthError::CodeRateLimited`
    /// - Delivery fails → `AuthError::NotificationFailed`
    pub async fn request_user_deletion_code(&self, user_id: UserId, ip: IpAddr) -> Result<()> {
        let user = self.require_user(user_id).await?;
        self.issue_and_deliver(
            &ActionKey::user_deletion(user_id),
            &user.email,
            CodePurpose::UserDeletion,
            ip,
        )
        .await
    }

    /// Delete the account and all its sessions after checking the code.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The account is gone → `AuthError::UserNotFound`
    /// - The code is rejected (see [`CodeEngine::verify_code`])
    pub async fn delete_user(&self, user_id: UserId, code: &str) -> Result<()> {
        self.require_user(user_id).await?;
        self.codes
            .verify_code(&ActionKey::user_deletion(user_id), code)
            .await?;

        let (deleted, revoked) = tokio::join!(
            self.users.delete(user_id),
            self.sessions().delete_all(user_id)
        );
        deleted?;
        revoked?;
        tracing::info!(user_id = %user_id, "Deleted account");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Tokens and sessions
    // ═══════════════════════════════════════════════════════════════════

    /// Check an access token for a request guard.
    ///
    /// # Errors
    ///
    /// Returns the token-layer error (`TokenExpired`, `TokenSignatureInvalid`,
    /// `TokenPayloadInvalid`).
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims> {
        Ok(self.tokens().verify_access(token)?.claims)
    }

    /// Rotate a refresh token.
    ///
    /// The presented session is consumed before anything is checked, so a
    /// refresh token can be exchanged at most once, and a failed check leaves
    /// no session behind.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The token is expired, forged or malformed
    /// - The account is gone → `AuthError::UserNotFound`
    /// - The session was already used, revoked or expired → `AuthError::SessionNotFoundOrExpired`
    /// - The token is not the one bound to the session → `AuthError::SessionSignatureMismatch`
    pub async fn refresh(&self, refresh_token: &str, client: &ClientInfo) -> Result<AuthSuccess> {
        let verified = self.tokens().verify_refresh(refresh_token)?;
        let user_id = verified.claims.sub;
        let session_id = verified.claims.sid;

        let (user, session) = tokio::join!(
            self.users.find_by_id(user_id),
            self.sessions().consume(user_id, session_id)
        );
        let session = session?;
        let user = user?.ok_or(AuthError::UserNotFound)?;
        let session = session.ok_or(AuthError::SessionNotFoundOrExpired)?;

        if !constant_time_eq(
            session.token_signature.as_bytes(),
            verified.signature.as_bytes(),
        ) {
            tracing::warn!(
                user_id = %user_id,
                session_id = %session_id,
                "Refresh token does not match its session"
            );
            return Err(AuthError::SessionSignatureMismatch);
        }

        self.issuer.start(&user, client).await
    }

    /// Sessions of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or holds a corrupt record.
    pub async fn list_sessions(&self, user_id: UserId, current: SessionId) -> Result<Vec<SessionInfo>> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions()
            .get_all(user_id)
            .await?
            .into_iter()
            .map(|(session_id, session)| SessionInfo {
                session_id,
                ip: session.ip,
                user_agent: session.user_agent,
                created_at: session.created_at,
                is_current: session_id == current,
            })
            .collect();
        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    /// Sign out one session of the user.
    ///
    /// Returns `true` when the removed session was the caller's own, so the
    /// caller knows to drop its cookies.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No such session exists → `AuthError::SessionNotFoundOrExpired`
    /// - The store fails
    pub async fn sign_out_session(
        &self,
        user_id: UserId,
        current: SessionId,
        target: SessionId,
    ) -> Result<bool> {
        if !self.sessions().delete(user_id, target).await? {
            return Err(AuthError::SessionNotFoundOrExpired);
        }
        Ok(target == current)
    }

    async fn check_revoker_age(&self, user_id: UserId, current: SessionId) -> Result<()> {
        let session = self
            .sessions()
            .get(user_id, current)
            .await?
            .ok_or(AuthError::SessionNotFoundOrExpired)?;

        if let Some(min_age) = self.revoke_others_min_age {
            if self.clock.now() - session.created_at < min_age {
                tracing::debug!(
                    user_id = %user_id,
                    session_id = %current,
                    "Session too young to revoke others"
                );
                return Err(AuthError::SessionRevocationTooEarly {
                    created_at: session.created_at,
                });
            }
        }
        Ok(())
    }

    /// Sign out every session of the user, the current one included.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The current session is gone → `AuthError::SessionNotFoundOrExpired`
    /// - The current session is younger than the configured minimum → `AuthError::SessionRevocationTooEarly`
    pub async fn sign_out_all(&self, user_id: UserId, current: SessionId) -> Result<()> {
        self.check_revoker_age(user_id, current).await?;
        self.sessions().delete_all(user_id).await
    }

    /// Sign out every session except the current one.
    ///
    /// Returns how many sessions were removed.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The current session is gone → `AuthError::SessionNotFoundOrExpired`
    /// - The current session is younger than the configured minimum → `AuthError::SessionRevocationTooEarly`
    pub async fn sign_out_all_except_current(&self, user_id: UserId, current: SessionId) -> Result<usize> {
        self.check_revoker_age(user_id, current).await?;

        let mut removed = 0;
        for session_id in self.sessions().get_all(user_id).await?.into_keys() {
            if session_id != current && self.sessions().delete(user_id, session_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════════════
    // OAuth
    // ═══════════════════════════════════════════════════════════════════

    /// Handle the provider redirect: exchange the code and route the profile.
    ///
    /// # Errors
    ///
    /// Returns error if the provider exchange fails, or see
    /// [`OAuthCoordinator::handle_callback`].
    pub async fn oauth_callback(
        &self,
        provider: OAuthProvider,
        code: &str,
        code_verifier: &str,
        client: &ClientInfo,
    ) -> Result<OAuthOutcome> {
        let profile = self
            .identity
            .fetch_profile(provider, code, code_verifier)
            .await?;
        self.oauth.handle_callback(profile, client).await
    }

    async fn deliver_attempt_code(&self, delivery: CodeDelivery, ip: IpAddr) -> Result<()> {
        self.deliver(&delivery.to, &delivery.code, delivery.purpose, ip)
            .await
    }

    /// Send the code that links a provider to the matching existing account.
    ///
    /// # Errors
    ///
    /// See [`OAuthCoordinator::sign_in_attempt_code`]; delivery failures
    /// surface as `AuthError::NotificationFailed`.
    pub async fn request_sign_in_attempt_code(&self, attempt_id: AttemptId, ip: IpAddr) -> Result<()> {
        let delivery = self.oauth.sign_in_attempt_code(attempt_id).await?;
        self.deliver_attempt_code(delivery, ip).await
    }

    /// Send the code that confirms the email of an OAuth sign-up.
    ///
    /// # Errors
    ///
    /// See [`OAuthCoordinator::sign_up_attempt_code`]; delivery failures
    /// surface as `AuthError::NotificationFailed`.
    pub async fn request_sign_up_attempt_code(
        &self,
        attempt_id: AttemptId,
        email: Option<&str>,
        ip: IpAddr,
    ) -> Result<()> {
        let email = email.map(normalize);
        let delivery = self
            .oauth
            .sign_up_attempt_code(attempt_id, email.as_deref())
            .await?;
        self.deliver_attempt_code(delivery, ip).await
    }

    /// Finish an OAuth sign-in attempt.
    ///
    /// # Errors
    ///
    /// See [`OAuthCoordinator::complete_sign_in`].
    pub async fn complete_oauth_sign_in(
        &self,
        attempt_id: AttemptId,
        code: &str,
        client: &ClientInfo,
    ) -> Result<AuthSuccess> {
        self.oauth.complete_sign_in(attempt_id, code, client).await
    }

    /// Finish an OAuth sign-up attempt.
    ///
    /// # Errors
    ///
    /// See [`OAuthCoordinator::complete_sign_up`].
    pub async fn complete_oauth_sign_up(
        &self,
        attempt_id: AttemptId,
        mut input: SignUpInput,
        code: Option<&str>,
        client: &ClientInfo,
    ) -> Result<AuthSuccess> {
        input.email = input.email.as_deref().map(normalize);
        self.oauth
            .complete_sign_up(attempt_id, input, code, client)
            .await
    }
}
