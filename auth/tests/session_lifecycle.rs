//! Integration tests for refresh rotation and session management.

mod common;

use chrono::Duration;
use common::{client, harness, harness_with};
use federated_auth::AuthError;
use federated_auth::clock::Clock;
use federated_auth::config::{SessionConfig, SessionOverflow};
use federated_auth::mocks::{ManualClock, MemoryKeyValueStore};
use federated_auth::session::SessionStore;
use federated_auth::state::{SessionId, TokenType, UserId};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

#[tokio::test]
async fn test_rotation_invalidates_predecessor() {
    let h = harness();
    h.seed_user("ada@example.com", "pw").await;
    let login = h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();

    let rotated = h
        .service
        .refresh(&login.tokens.refresh_token, &client())
        .await
        .unwrap();
    assert_ne!(rotated.session_id, login.session_id);

    let replay = h.service.refresh(&login.tokens.refresh_token, &client()).await;
    assert_eq!(replay.unwrap_err(), AuthError::SessionNotFoundOrExpired);

    // The successor is still good.
    h.service
        .refresh(&rotated.tokens.refresh_token, &client())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_refresh_of_one_session_has_one_winner() {
    let h = harness();
    h.seed_user("ada@example.com", "pw").await;
    let login = h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();
    let token = &login.tokens.refresh_token;
    let client = client();

    let (first, second) = tokio::join!(
        h.service.refresh(token, &client),
        h.service.refresh(token, &client)
    );
    let (won, lost) = match (first, second) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected exactly one successful refresh, got {other:?}"),
    };
    assert_eq!(lost, AuthError::SessionNotFoundOrExpired);
    assert_ne!(won.session_id, login.session_id);
}

#[tokio::test]
async fn test_refresh_material_signatures_differ() {
    let h = harness();
    let user_id = UserId::new();
    let a = h.service.tokens().issue_refresh_material(user_id).unwrap();
    let b = h.service.tokens().issue_refresh_material(user_id).unwrap();

    assert_ne!(a.session_id, b.session_id);
    assert_ne!(a.token_signature, b.token_signature);
}

#[tokio::test]
async fn test_foreign_signature_is_rejected_and_session_burned() {
    let h = harness();
    let user = h.seed_user("ada@example.com", "pw").await;
    let a = h.service.tokens().issue_refresh_material(user.id).unwrap();
    let b = h.service.tokens().issue_refresh_material(user.id).unwrap();

    // Session A stored with B's binding.
    h.service
        .sessions()
        .create(user.id, a.session_id, &b.token_signature, &client())
        .await
        .unwrap();

    let err = h.service.refresh(&a.refresh_token, &client()).await.unwrap_err();
    assert_eq!(err, AuthError::SessionSignatureMismatch);
    assert!(err.is_security_issue());
    assert_eq!(h.service.sessions().get(user.id, a.session_id).await.unwrap(), None);
}

#[tokio::test]
async fn test_expired_refresh_token() {
    let h = harness();
    h.seed_user("ada@example.com", "pw").await;
    let login = h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();

    h.clock.advance(Duration::days(14));
    let err = h
        .service
        .refresh(&login.tokens.refresh_token, &client())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::TokenExpired {
            token_type: TokenType::Refresh,
            ..
        }
    ));
}

#[tokio::test]
async fn test_access_token_is_not_a_refresh_token() {
    let h = harness();
    h.seed_user("ada@example.com", "pw").await;
    let login = h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();

    let err = h
        .service
        .refresh(&login.tokens.access_token, &client())
        .await
        .unwrap_err();
    assert!(err.is_security_issue());

    let claims = h.service.verify_access_token(&login.tokens.access_token).unwrap();
    assert_eq!(claims.sid, login.session_id);
    assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
}

#[tokio::test]
async fn test_refresh_for_deleted_account() {
    let h = harness();
    let user = h.seed_user("ada@example.com", "pw").await;
    let login = h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();

    federated_auth::providers::UserDirectory::delete(&h.users, user.id)
        .await
        .unwrap();
    let err = h
        .service
        .refresh(&login.tokens.refresh_token, &client())
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::UserNotFound);
    assert_eq!(
        h.service.sessions().get(user.id, login.session_id).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_oldest_session_is_evicted() {
    let h = harness();
    let user = h.seed_user("ada@example.com", "pw").await;

    let mut logins = Vec::new();
    for _ in 0..6 {
        logins.push(h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap());
        h.clock.advance(Duration::seconds(1));
    }

    let live: BTreeSet<SessionId> = h
        .service
        .sessions()
        .get_all(user.id)
        .await
        .unwrap()
        .into_keys()
        .collect();
    let expected: BTreeSet<SessionId> = logins[1..].iter().map(|l| l.session_id).collect();
    assert_eq!(live, expected);

    let err = h
        .service
        .refresh(&logins[0].tokens.refresh_token, &client())
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::SessionNotFoundOrExpired);
}

#[tokio::test]
async fn test_reject_overflow_policy() {
    let mut config = common::config();
    config.sessions = SessionConfig::new(2).with_overflow(SessionOverflow::Reject);
    let h = harness_with(config);
    h.seed_user("ada@example.com", "pw").await;

    for _ in 0..2 {
        h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();
    }
    let err = h
        .service
        .sign_in("ada@example.com", "pw", &client())
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::MaxSessionsExceeded { max: 2 });
}

#[tokio::test]
async fn test_sign_out_session_reports_current() {
    let h = harness();
    let user = h.seed_user("ada@example.com", "pw").await;
    let first = h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();
    let second = h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();

    let own = h
        .service
        .sign_out_session(user.id, first.session_id, second.session_id)
        .await
        .unwrap();
    assert!(!own);

    let own = h
        .service
        .sign_out_session(user.id, first.session_id, first.session_id)
        .await
        .unwrap();
    assert!(own);

    let err = h
        .service
        .sign_out_session(user.id, first.session_id, first.session_id)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::SessionNotFoundOrExpired);
}

#[tokio::test]
async fn test_sign_out_all_except_current() {
    let h = harness();
    let user = h.seed_user("ada@example.com", "pw").await;
    let mut logins = Vec::new();
    for _ in 0..3 {
        logins.push(h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap());
    }
    let current = logins[1].session_id;

    let removed = h
        .service
        .sign_out_all_except_current(user.id, current)
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let sessions = h.service.list_sessions(user.id, current).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].is_current);
    assert_eq!(sessions[0].session_id, current);
}

#[tokio::test]
async fn test_sign_out_all_respects_minimum_age() {
    let mut config = common::config();
    config.sessions = SessionConfig::new(5).with_revoke_others_min_age(Duration::hours(1));
    let h = harness_with(config);
    let user = h.seed_user("ada@example.com", "pw").await;
    let login = h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();
    let created_at = h.clock.now();

    let err = h
        .service
        .sign_out_all(user.id, login.session_id)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::SessionRevocationTooEarly { created_at });

    h.clock.advance(Duration::hours(1));
    h.service.sign_out_all(user.id, login.session_id).await.unwrap();
    assert!(!h.kv.contains(&format!("session:{}", user.id)).unwrap());
}

#[tokio::test]
async fn test_sign_out_all_requires_live_current_session() {
    let h = harness();
    let user = h.seed_user("ada@example.com", "pw").await;
    let err = h
        .service
        .sign_out_all(user.id, SessionId::new())
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::SessionNotFoundOrExpired);
}

#[tokio::test]
async fn test_list_sessions_newest_first() {
    let h = harness();
    let user = h.seed_user("ada@example.com", "pw").await;
    let older = h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();
    h.clock.advance(Duration::minutes(1));
    let newer = h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();

    let sessions = h.service.list_sessions(user.id, older.session_id).await.unwrap();
    let ids: Vec<SessionId> = sessions.iter().map(|s| s.session_id).collect();
    assert_eq!(ids, vec![newer.session_id, older.session_id]);
    assert!(!sessions[0].is_current);
    assert!(sessions[1].is_current);
    assert_eq!(sessions[0].user_agent, "integration-test");
}

#[tokio::test]
async fn test_session_field_expires_with_refresh_token() {
    let h = harness();
    let user = h.seed_user("ada@example.com", "pw").await;
    h.service.sign_in("ada@example.com", "pw", &client()).await.unwrap();
    assert_eq!(
        h.kv.ttl(&format!("session:{}", user.id)).unwrap(),
        Some(Duration::days(14))
    );

    h.clock.advance(Duration::days(14));
    assert!(h.service.sessions().get_all(user.id).await.unwrap().is_empty());
}

proptest! {
    #[test]
    fn prop_survivors_are_the_newest(max in 1_usize..6, extra in 1_usize..4) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let clock = ManualClock::default();
            let kv = MemoryKeyValueStore::new(Arc::new(clock.clone()));
            let store = SessionStore::new(
                kv,
                &SessionConfig::new(max),
                Duration::days(14),
                Arc::new(clock.clone()),
            );
            let user_id = UserId::new();

            let mut created = Vec::new();
            for _ in 0..max + extra {
                let session_id = SessionId::new();
                store.create(user_id, session_id, "sig", &client()).await.unwrap();
                created.push(session_id);
                clock.advance(Duration::milliseconds(10));
            }

            let live: BTreeSet<SessionId> = store.get_all(user_id).await.unwrap().into_keys().collect();
            let newest: BTreeSet<SessionId> = created[extra..].iter().copied().collect();
            prop_assert_eq!(live, newest);
            Ok(())
        })?;
    }
}
