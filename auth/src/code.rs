//! One-time verification codes with escalating request throttling.
//!
//! A code record lives at `code:<actionKey>` for the configured record
//! lifetime. It remembers how many codes were requested in the current
//! window, so each further request must wait longer than the previous one.
//! The code itself is only accepted within the shorter validity window and
//! for a limited number of guesses.

use crate::clock::Clock;
use crate::config::{CodeConfig, ttl_secs};
use crate::error::{AuthError, Result};
use crate::providers::KeyValueStore;
use crate::record;
use crate::state::{AttemptId, UserId};
use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifies what a code authorizes, and for whom.
///
/// Emails are normalized (trimmed, lowercased) so casing cannot be used to
/// dodge throttling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey(String);

pub(crate) fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

impl ActionKey {
    /// Email ownership check before password sign-up.
    #[must_use]
    pub fn sign_up(email: &str) -> Self {
        Self(format!("sign-up:{}", normalize(email)))
    }

    /// Passwordless sign-in.
    #[must_use]
    pub fn sign_in(email: &str) -> Self {
        Self(format!("sign-in:{}", normalize(email)))
    }

    /// Password reset.
    #[must_use]
    pub fn password_reset(email: &str) -> Self {
        Self(format!("password-reset:{}", normalize(email)))
    }

    /// Ownership check of a new email for an existing account.
    #[must_use]
    pub fn email_change(user_id: UserId, new_email: &str) -> Self {
        Self(format!("email-change:{user_id}:{}", normalize(new_email)))
    }

    /// Account deletion confirmation.
    #[must_use]
    pub fn user_deletion(user_id: UserId) -> Self {
        Self(format!("user-deletion:{user_id}"))
    }

    /// Linking a provider to an existing account through an OAuth attempt.
    #[must_use]
    pub fn oauth_sign_in(attempt_id: AttemptId) -> Self {
        Self(format!("oauth-sign-in:{attempt_id}"))
    }

    /// Verifying the email chosen during an OAuth sign-up attempt.
    ///
    /// Bound to the email, so a code sent to one address cannot confirm another.
    #[must_use]
    pub fn oauth_sign_up(attempt_id: AttemptId, email: &str) -> Self {
        Self(format!("oauth-sign-up:{attempt_id}:{}", normalize(email)))
    }

    /// Get the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn store_key(&self) -> String {
        format!("code:{}", self.0)
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored rate-limit and verification state for one action key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRecord {
    /// Current code.
    pub code: String,

    /// Guesses left for `code`.
    pub attempts_remaining: u32,

    /// When `code` was issued (epoch milliseconds on the wire).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// Codes requested in the current window.
    pub request_count: u32,
}

/// Code engine.
#[derive(Clone)]
pub struct CodeEngine<K: KeyValueStore> {
    kv: K,
    config: CodeConfig,
    clock: Arc<dyn Clock>,
}

impl<K: KeyValueStore> CodeEngine<K> {
    /// Create a code engine.
    #[must_use]
    pub fn new(kv: K, config: CodeConfig, clock: Arc<dyn Clock>) -> Self {
        Self { kv, config, clock }
    }

    /// Issue a new code for `action`, subject to request throttling.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The escalating interval has not elapsed → `AuthError::CodeRateLimited`
    /// - The store fails or holds a corrupt record
    /// - The configured length has too many digits → `AuthError::Configuration`
    pub async fn create_code(&self, action: &ActionKey) -> Result<String> {
        let key = action.store_key();
        let now = self.clock.now();
        let existing: Option<CodeRecord> = record::decode_opt(&key, self.kv.get(&key).await?)?;

        let request_count = match existing {
            Some(previous) => {
                let request_count = previous.request_count.saturating_add(1);
                let allowed_at = previous.created_at + self.config.interval_for(request_count);
                if now < allowed_at {
                    tracing::debug!(
                        action = %action,
                        request_count = request_count,
                        allowed_at = %allowed_at,
                        "Code request throttled"
                    );
                    return Err(AuthError::CodeRateLimited { allowed_at });
                }
                request_count
            }
            None => 1,
        };

        let code = generate_code(self.config.length)?;
        let stored = CodeRecord {
            code: code.clone(),
            attempts_remaining: self.config.max_attempts,
            created_at: now,
            request_count,
        };
        self.kv
            .set_ex(
                &key,
                &record::encode(&key, &stored)?,
                ttl_secs(self.config.record_ttl),
            )
            .await?;

        tracing::debug!(action = %action, request_count = request_count, "Issued code");
        Ok(code)
    }

    /// Check `submitted` against the live code for `action`.
    ///
    /// A match consumes the record. A mismatch spends one attempt without
    /// touching the record's lifetime.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No code is live → `AuthError::CodeNotFoundOrExpired`
    /// - Every attempt is spent → `AuthError::CodeMaxAttemptsExceeded`
    /// - The code is wrong → `AuthError::CodeIncorrect` with the attempts left
    /// - The store fails or holds a corrupt record
    pub async fn verify_code(&self, action: &ActionKey, submitted: &str) -> Result<()> {
        let key = action.store_key();
        let mut stored: CodeRecord = record::decode_opt(&key, self.kv.get(&key).await?)?
            .ok_or(AuthError::CodeNotFoundOrExpired)?;

        if self.clock.now() >= stored.created_at + self.config.validity {
            return Err(AuthError::CodeNotFoundOrExpired);
        }
        if stored.attempts_remaining == 0 {
            tracing::warn!(action = %action, "Code verification with no attempts left");
            return Err(AuthError::CodeMaxAttemptsExceeded);
        }

        if !constant_time_eq(stored.code.as_bytes(), submitted.as_bytes()) {
            stored.attempts_remaining -= 1;
            self.kv
                .set_keep_ttl(&key, &record::encode(&key, &stored)?)
                .await?;
            if stored.attempts_remaining == 0 {
                tracing::warn!(action = %action, "Code attempts exhausted");
            }
            return Err(AuthError::CodeIncorrect {
                attempts_left: stored.attempts_remaining,
            });
        }

        self.kv.del(&key).await?;
        tracing::debug!(action = %action, "Code verified");
        Ok(())
    }
}

/// Uniform zero-padded numeric code of `length` digits.
fn generate_code(length: u32) -> Result<String> {
    let upper = 10_u64.checked_pow(length).ok_or_else(|| {
        AuthError::Configuration(format!("code length {length} exceeds the supported digits"))
    })?;
    let value = rand::thread_rng().gen_range(0..upper);
    Ok(format!("{value:0width$}", width = length as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{ManualClock, MemoryKeyValueStore};
    use chrono::Duration;
    use proptest::prelude::*;

    fn engine() -> (CodeEngine<MemoryKeyValueStore>, MemoryKeyValueStore, ManualClock) {
        let clock = ManualClock::default();
        let kv = MemoryKeyValueStore::new(Arc::new(clock.clone()));
        (
            CodeEngine::new(kv.clone(), CodeConfig::default(), Arc::new(clock.clone())),
            kv,
            clock,
        )
    }

    #[test]
    fn test_action_keys_normalize_email() {
        assert_eq!(
            ActionKey::sign_up("  Ada@Example.COM ").as_str(),
            "sign-up:ada@example.com"
        );
        let user_id = UserId::new();
        assert_eq!(
            ActionKey::user_deletion(user_id).to_string(),
            format!("user-deletion:{user_id}")
        );
    }

    #[tokio::test]
    async fn test_record_layout() {
        let (engine, kv, clock) = engine();
        let action = ActionKey::sign_in("a@b.c");
        let code = engine.create_code(&action).await.unwrap();

        let raw = kv.get("code:sign-in:a@b.c").await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["code"], code);
        assert_eq!(json["attemptsRemaining"], 3);
        assert_eq!(json["requestCount"], 1);
        assert_eq!(json["createdAt"], clock.now().timestamp_millis());
        assert_eq!(kv.ttl("code:sign-in:a@b.c").unwrap(), Some(Duration::hours(2)));
    }

    #[tokio::test]
    async fn test_validity_window() {
        let (engine, _, clock) = engine();
        let action = ActionKey::sign_up("a@b.c");
        let code = engine.create_code(&action).await.unwrap();

        clock.advance(Duration::minutes(5));
        assert_eq!(
            engine.verify_code(&action, &code).await.unwrap_err(),
            AuthError::CodeNotFoundOrExpired
        );
    }

    #[tokio::test]
    async fn test_wrong_guess_keeps_ttl() {
        let (engine, kv, clock) = engine();
        let action = ActionKey::sign_up("a@b.c");
        let code = engine.create_code(&action).await.unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        clock.advance(Duration::minutes(1));
        assert!(engine.verify_code(&action, wrong).await.is_err());
        assert_eq!(
            kv.ttl("code:sign-up:a@b.c").unwrap(),
            Some(Duration::hours(2) - Duration::minutes(1))
        );
    }

    #[tokio::test]
    async fn test_request_count_resets_with_record() {
        let (engine, _, clock) = engine();
        let action = ActionKey::password_reset("a@b.c");
        engine.create_code(&action).await.unwrap();

        clock.advance(Duration::hours(2));
        engine.create_code(&action).await.unwrap();
        assert!(matches!(
            engine.create_code(&action).await,
            Err(AuthError::CodeRateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported() {
        let (engine, kv, _) = engine();
        kv.insert_raw("code:sign-up:a@b.c", "{oops").unwrap();
        let err = engine
            .create_code(&ActionKey::sign_up("a@b.c"))
            .await
            .unwrap_err();
        assert!(err.is_system_error());
    }

    #[tokio::test]
    async fn test_oversized_code_length_is_a_configuration_error() {
        let clock = ManualClock::default();
        let kv = MemoryKeyValueStore::new(Arc::new(clock.clone()));
        let engine = CodeEngine::new(
            kv,
            CodeConfig::default().with_length(20),
            Arc::new(clock),
        );
        let err = engine
            .create_code(&ActionKey::sign_up("a@b.c"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    proptest! {
        #[test]
        fn prop_codes_are_fixed_length_digits(length in 4_u32..=9) {
            let code = generate_code(length).unwrap();
            prop_assert_eq!(code.len(), length as usize);
            prop_assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
