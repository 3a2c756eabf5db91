//! Integration tests for one-time code flows.

mod common;

use chrono::Duration;
use common::{client, harness, ip};
use federated_auth::AuthError;
use federated_auth::clock::Clock;
use federated_auth::mocks::test_epoch;
use federated_auth::providers::{CodePurpose, UserDirectory};

const EMAIL: &str = "ada@example.com";

#[tokio::test]
async fn test_sign_up_with_emailed_code() {
    let h = harness();
    h.service.request_sign_up_code(" Ada@Example.com ", ip()).await.unwrap();

    let sent = h.notifier.sent().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, EMAIL);
    assert_eq!(sent[0].context.purpose, CodePurpose::SignUp);
    assert_eq!(sent[0].context.ip, ip());
    assert_eq!(sent[0].context.requested_at, test_epoch());
    assert_eq!(sent[0].code.len(), 6);

    let login = h
        .service
        .sign_up(EMAIL, "secret", &sent[0].code, &client())
        .await
        .unwrap();
    assert_eq!(login.user.email, EMAIL);
    assert_eq!(login.user.password_hash.as_deref(), Some("hashed:secret"));

    let err = h.service.request_sign_up_code(EMAIL, ip()).await.unwrap_err();
    assert_eq!(err, AuthError::EmailAlreadyTaken);
}

#[tokio::test]
async fn test_rate_limit_escalation() {
    let h = harness();
    let created_at = h.clock.now();
    h.service.request_sign_up_code(EMAIL, ip()).await.unwrap();

    h.clock.advance(Duration::seconds(10));
    let err = h.service.request_sign_up_code(EMAIL, ip()).await.unwrap_err();
    assert_eq!(
        err,
        AuthError::CodeRateLimited {
            allowed_at: created_at + Duration::seconds(30)
        }
    );

    // Each further request waits for the next step of the schedule.
    h.clock.advance(Duration::seconds(20));
    h.service.request_sign_up_code(EMAIL, ip()).await.unwrap();
    for wait in [60, 120, 300] {
        h.clock.advance(Duration::seconds(wait - 1));
        assert!(matches!(
            h.service.request_sign_up_code(EMAIL, ip()).await,
            Err(AuthError::CodeRateLimited { .. })
        ));
        h.clock.advance(Duration::seconds(1));
        h.service.request_sign_up_code(EMAIL, ip()).await.unwrap();
    }
    assert_eq!(h.notifier.sent().unwrap().len(), 5);
}

#[tokio::test]
async fn test_attempt_exhaustion() {
    let h = harness();
    h.service.request_sign_up_code(EMAIL, ip()).await.unwrap();
    let code = h.notifier.last_code(EMAIL, CodePurpose::SignUp).unwrap().unwrap();

    for attempts_left in [2, 1, 0] {
        let err = h
            .service
            .sign_up(EMAIL, "secret", "not-the-code", &client())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::CodeIncorrect { attempts_left });
    }

    let err = h
        .service
        .sign_up(EMAIL, "secret", &code, &client())
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::CodeMaxAttemptsExceeded);
    assert_eq!(h.users.count().unwrap(), 0);
}

#[tokio::test]
async fn test_verification_is_single_use() {
    let h = harness();
    h.seed_user(EMAIL, "pw").await;
    h.service.request_sign_in_code(EMAIL, ip()).await.unwrap();
    let code = h.notifier.last_code(EMAIL, CodePurpose::SignIn).unwrap().unwrap();

    h.service.sign_in_by_code(EMAIL, &code, &client()).await.unwrap();
    let err = h
        .service
        .sign_in_by_code(EMAIL, &code, &client())
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::CodeNotFoundOrExpired);
}

#[tokio::test]
async fn test_code_outlives_validity_only_for_throttling() {
    let h = harness();
    h.seed_user(EMAIL, "pw").await;
    h.service.request_sign_in_code(EMAIL, ip()).await.unwrap();
    let code = h.notifier.last_code(EMAIL, CodePurpose::SignIn).unwrap().unwrap();

    h.clock.advance(Duration::minutes(5));
    let err = h
        .service
        .sign_in_by_code(EMAIL, &code, &client())
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::CodeNotFoundOrExpired);
    assert!(h.kv.contains(&format!("code:sign-in:{EMAIL}")).unwrap());
}

#[tokio::test]
async fn test_delivery_failure_still_persists_code() {
    let h = harness();
    h.notifier.set_failing(true);
    let err = h.service.request_sign_up_code(EMAIL, ip()).await.unwrap_err();
    assert!(matches!(err, AuthError::NotificationFailed(_)));
    assert!(h.kv.contains(&format!("code:sign-up:{EMAIL}")).unwrap());

    h.notifier.set_failing(false);
    assert!(matches!(
        h.service.request_sign_up_code(EMAIL, ip()).await,
        Err(AuthError::CodeRateLimited { .. })
    ));
}

#[tokio::test]
async fn test_password_sign_in_hides_which_part_was_wrong() {
    let h = harness();
    h.seed_user(EMAIL, "pw").await;

    let unknown = h
        .service
        .sign_in("nobody@example.com", "pw", &client())
        .await
        .unwrap_err();
    let wrong = h.service.sign_in(EMAIL, "nope", &client()).await.unwrap_err();
    assert_eq!(unknown, AuthError::InvalidCredentials);
    assert_eq!(wrong, AuthError::InvalidCredentials);
}

#[tokio::test]
async fn test_password_reset_revokes_sessions() {
    let h = harness();
    let user = h.seed_user(EMAIL, "old").await;
    let login = h.service.sign_in(EMAIL, "old", &client()).await.unwrap();
    h.service.sign_in(EMAIL, "old", &client()).await.unwrap();

    h.service.request_password_reset_code(EMAIL, ip()).await.unwrap();
    let code = h
        .notifier
        .last_code(EMAIL, CodePurpose::PasswordReset)
        .unwrap()
        .unwrap();
    h.service.reset_password(EMAIL, &code, "new").await.unwrap();

    assert!(h.service.sessions().get_all(user.id).await.unwrap().is_empty());
    assert_eq!(
        h.service
            .refresh(&login.tokens.refresh_token, &client())
            .await
            .unwrap_err(),
        AuthError::SessionNotFoundOrExpired
    );
    assert_eq!(
        h.service.sign_in(EMAIL, "old", &client()).await.unwrap_err(),
        AuthError::InvalidCredentials
    );
    h.service.sign_in(EMAIL, "new", &client()).await.unwrap();
}

#[tokio::test]
async fn test_password_reset_for_unknown_email() {
    let h = harness();
    let err = h
        .service
        .request_password_reset_code(EMAIL, ip())
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::UserNotFound);
    assert!(h.notifier.sent().unwrap().is_empty());
}

#[tokio::test]
async fn test_email_change_code_is_bound_to_new_address() {
    let h = harness();
    let user = h.seed_user(EMAIL, "pw").await;

    h.service
        .request_email_change_code(user.id, "new@example.com", ip())
        .await
        .unwrap();
    let code = h
        .notifier
        .last_code("new@example.com", CodePurpose::EmailChange)
        .unwrap()
        .unwrap();

    // The code does not confirm a different address.
    assert_eq!(
        h.service
            .change_email(user.id, "other@example.com", &code)
            .await
            .unwrap_err(),
        AuthError::CodeNotFoundOrExpired
    );

    h.service
        .change_email(user.id, "new@example.com", &code)
        .await
        .unwrap();
    let updated = h.users.find_by_id(user.id).await.unwrap().unwrap();
    assert_eq!(updated.email, "new@example.com");
}

#[tokio::test]
async fn test_email_change_to_taken_address() {
    let h = harness();
    let user = h.seed_user(EMAIL, "pw").await;
    h.seed_user("taken@example.com", "pw").await;

    let err = h
        .service
        .request_email_change_code(user.id, "Taken@Example.com", ip())
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::EmailAlreadyTaken);
}

#[tokio::test]
async fn test_user_deletion_removes_account_and_sessions() {
    let h = harness();
    let user = h.seed_user(EMAIL, "pw").await;
    h.service.sign_in(EMAIL, "pw", &client()).await.unwrap();

    h.service.request_user_deletion_code(user.id, ip()).await.unwrap();
    let code = h
        .notifier
        .last_code(EMAIL, CodePurpose::UserDeletion)
        .unwrap()
        .unwrap();
    h.service.delete_user(user.id, &code).await.unwrap();

    assert_eq!(h.users.find_by_id(user.id).await.unwrap(), None);
    assert!(!h.kv.contains(&format!("session:{}", user.id)).unwrap());
    assert_eq!(
        h.service.request_user_deletion_code(user.id, ip()).await.unwrap_err(),
        AuthError::UserNotFound
    );
}
