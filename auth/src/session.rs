//! Per-user session collection and session issuance.
//!
//! Every user owns one hash at `session:<userId>`. Each field is a session ID
//! whose value is the JSON [`Session`] record, bound to exactly one refresh
//! token through its signature. Fields expire individually with the refresh
//! token; the whole key is re-armed to the same lifetime on every insert.
//!
//! Capacity is enforced on insert. The oldest session by creation time is
//! evicted, or the insert is refused, depending on [`SessionOverflow`].

use crate::clock::Clock;
use crate::config::{SessionConfig, SessionOverflow, ttl_secs};
use crate::error::{AuthError, Result};
use crate::providers::{KeyValueStore, User};
use crate::record;
use crate::state::{AuthSuccess, ClientInfo, SessionId, TokenPair, UserId};
use crate::token::TokenIssuer;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// One active login context for a user and device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Signature of the refresh token this session accepts.
    pub token_signature: String,

    /// Client IP at creation.
    pub ip: IpAddr,

    /// Client user agent at creation.
    #[serde(rename = "ua")]
    pub user_agent: String,

    /// Creation time (epoch milliseconds on the wire).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// A session as shown to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session ID.
    pub session_id: SessionId,
    /// Client IP at creation.
    pub ip: IpAddr,
    /// Client user agent at creation.
    pub user_agent: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Whether this is the session making the request.
    pub is_current: bool,
}

/// Session store.
#[derive(Clone)]
pub struct SessionStore<K: KeyValueStore> {
    kv: K,
    max_sessions: usize,
    overflow: SessionOverflow,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: KeyValueStore> SessionStore<K> {
    /// Create a session store whose sessions live for `ttl`.
    #[must_use]
    pub fn new(kv: K, config: &SessionConfig, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            max_sessions: config.max_sessions,
            overflow: config.overflow,
            ttl,
            clock,
        }
    }

    fn key(user_id: UserId) -> String {
        format!("session:{user_id}")
    }

    /// Persist a new session, enforcing capacity first.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The user is at capacity and the policy is `Reject` → `AuthError::MaxSessionsExceeded`
    /// - The store fails or holds a corrupt record
    pub async fn create(
        &self,
        user_id: UserId,
        session_id: SessionId,
        token_signature: &str,
        client: &ClientInfo,
    ) -> Result<Session> {
        let key = Self::key(user_id);
        let mut sessions = self.get_all(user_id).await?;

        if sessions.len() >= self.max_sessions && self.overflow == SessionOverflow::Reject {
            return Err(AuthError::MaxSessionsExceeded {
                max: self.max_sessions,
            });
        }
        while sessions.len() >= self.max_sessions {
            let Some(oldest) = oldest_session(&sessions) else {
                break;
            };
            self.kv.hdel(&key, &oldest.to_string()).await?;
            sessions.remove(&oldest);
            tracing::info!(
                user_id = %user_id,
                session_id = %oldest,
                max_sessions = self.max_sessions,
                "Evicted oldest session"
            );
        }

        let session = Session {
            token_signature: token_signature.to_string(),
            ip: client.ip,
            user_agent: client.user_agent.clone(),
            created_at: self.clock.now(),
        };
        let field = session_id.to_string();
        let ttl = ttl_secs(self.ttl);

        self.kv
            .hset(&key, &field, &record::encode(&key, &session)?)
            .await?;
        self.kv.hexpire(&key, &field, ttl).await?;
        self.kv.expire(&key, ttl).await?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            ip = %session.ip,
            "Created session"
        );
        Ok(session)
    }

    /// Get one session.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or holds a corrupt record.
    pub async fn get(&self, user_id: UserId, session_id: SessionId) -> Result<Option<Session>> {
        let key = Self::key(user_id);
        let raw = self.kv.hget(&key, &session_id.to_string()).await?;
        record::decode_opt(&key, raw)
    }

    /// Get all sessions of a user.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or holds a corrupt record.
    pub async fn get_all(&self, user_id: UserId) -> Result<HashMap<SessionId, Session>> {
        let key = Self::key(user_id);
        self.kv
            .hgetall(&key)
            .await?
            .into_iter()
            .map(|(field, raw)| {
                let session_id = field.parse::<SessionId>().map_err(|e| AuthError::CorruptRecord {
                    key: key.clone(),
                    reason: format!("invalid session id '{field}': {e}"),
                })?;
                Ok((session_id, record::decode(&key, &raw)?))
            })
            .collect()
    }

    /// Delete one session, reporting whether it existed.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn delete(&self, user_id: UserId, session_id: SessionId) -> Result<bool> {
        let removed = self
            .kv
            .hdel(&Self::key(user_id), &session_id.to_string())
            .await?;
        if removed {
            tracing::info!(user_id = %user_id, session_id = %session_id, "Deleted session");
        }
        Ok(removed)
    }

    /// Delete every session of a user.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn delete_all(&self, user_id: UserId) -> Result<()> {
        self.kv.del(&Self::key(user_id)).await?;
        tracing::info!(user_id = %user_id, "Deleted all sessions");
        Ok(())
    }

    /// Remove a session and return what it was, atomically.
    ///
    /// Of two concurrent callers, at most one receives the session.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or holds a corrupt record.
    pub async fn consume(&self, user_id: UserId, session_id: SessionId) -> Result<Option<Session>> {
        let key = Self::key(user_id);
        let raw = self.kv.htake(&key, &session_id.to_string()).await?;
        let session = record::decode_opt(&key, raw)?;
        if session.is_some() {
            tracing::info!(user_id = %user_id, session_id = %session_id, "Consumed session");
        }
        Ok(session)
    }
}

/// Session with the smallest `created_at`; ties go to the smallest ID.
fn oldest_session(sessions: &HashMap<SessionId, Session>) -> Option<SessionId> {
    sessions
        .iter()
        .min_by_key(|(id, session)| (session.created_at, **id))
        .map(|(id, _)| *id)
}

/// Mints a token pair and persists the session that binds it.
#[derive(Clone)]
pub struct SessionIssuer<K: KeyValueStore> {
    tokens: TokenIssuer,
    sessions: SessionStore<K>,
}

impl<K: KeyValueStore> SessionIssuer<K> {
    /// Create a session issuer.
    #[must_use]
    pub const fn new(tokens: TokenIssuer, sessions: SessionStore<K>) -> Self {
        Self { tokens, sessions }
    }

    /// The token issuer.
    #[must_use]
    pub const fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// The session store.
    #[must_use]
    pub const fn sessions(&self) -> &SessionStore<K> {
        &self.sessions
    }

    /// Open a new session for `user` and return both tokens.
    ///
    /// # Errors
    ///
    /// Returns error if signing fails, the session is refused, or the store fails.
    pub async fn start(&self, user: &User, client: &ClientInfo) -> Result<AuthSuccess> {
        let material = self.tokens.issue_refresh_material(user.id)?;
        self.sessions
            .create(user.id, material.session_id, &material.token_signature, client)
            .await?;
        let access =
            self.tokens
                .issue_access(user.id, material.session_id, user.role, Some(&user.email))?;

        Ok(AuthSuccess {
            user: user.clone(),
            session_id: material.session_id,
            tokens: TokenPair {
                access_token: access.token,
                refresh_token: material.refresh_token,
                access_expires_at: access.expires_at,
            },
        })
    }
}
