//! Account lockout: consecutive failures, precedence over valid
//! credentials, and recovery after expiry.

mod common;

use auth_core::services::{AuthError, UserRepository};
use chrono::{Duration, Utc};
use common::*;

#[tokio::test]
async fn test_lockout_after_five_failures_beats_correct_password() {
    let harness = spawn();
    register_user(&harness, "alice@example.com").await;

    for _ in 0..5 {
        let result = harness
            .auth
            .login(login_request("alice@example.com", "Wr0ng-Password!x"))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    // 6th attempt with the CORRECT password still fails: lockout wins
    let result = harness
        .auth
        .login(login_request("alice@example.com", STRONG_PASSWORD))
        .await;
    assert!(matches!(result, Err(AuthError::AccountLocked { .. })));
}

#[tokio::test]
async fn test_lockout_expiry_restores_access() {
    let harness = spawn();
    let user_id = register_user(&harness, "alice@example.com").await;

    for _ in 0..5 {
        let _ = harness
            .auth
            .login(login_request("alice@example.com", "Wr0ng-Password!x"))
            .await;
    }
    assert!(matches!(
        harness
            .auth
            .login(login_request("alice@example.com", STRONG_PASSWORD))
            .await,
        Err(AuthError::AccountLocked { .. })
    ));

    // Simulate the lockout window elapsing
    let mut user = harness.users.find_by_id(user_id).await.unwrap().unwrap();
    user.locked_until = Some(Utc::now() - Duration::seconds(1));
    harness.users.update(&user).await.unwrap();

    let success = harness
        .auth
        .login(login_request("alice@example.com", STRONG_PASSWORD))
        .await
        .expect("login should succeed after lockout expiry");
    assert!(!success.tokens.access_token.is_empty());
    assert!(!success.tokens.refresh_token.is_empty());

    // Success reset the counter
    let user = harness.users.find_by_id(user_id).await.unwrap().unwrap();
    assert_eq!(user.failed_login_count, 0);
    assert!(user.locked_until.is_none());
}

#[tokio::test]
async fn test_success_resets_consecutive_failures() {
    let harness = spawn();
    register_user(&harness, "alice@example.com").await;

    for _ in 0..4 {
        let _ = harness
            .auth
            .login(login_request("alice@example.com", "Wr0ng-Password!x"))
            .await;
    }
    login_user(&harness, "alice@example.com").await;

    // Four more failures after the reset must not lock yet
    for _ in 0..4 {
        let result = harness
            .auth
            .login(login_request("alice@example.com", "Wr0ng-Password!x"))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }
    login_user(&harness, "alice@example.com").await;
}

#[tokio::test]
async fn test_locked_account_rejects_refresh() {
    let harness = spawn();
    let user_id = register_user(&harness, "alice@example.com").await;
    let success = login_user(&harness, "alice@example.com").await;

    let mut user = harness.users.find_by_id(user_id).await.unwrap().unwrap();
    user.locked_until = Some(Utc::now() + Duration::minutes(15));
    harness.users.update(&user).await.unwrap();

    let result = harness.auth.refresh(&success.tokens.refresh_token).await;
    assert!(matches!(result, Err(AuthError::AccountLocked { .. })));
}

#[tokio::test]
async fn test_reset_clears_lockout_when_configured() {
    let harness = spawn();
    let user_id = register_user(&harness, "alice@example.com").await;

    for _ in 0..5 {
        let _ = harness
            .auth
            .login(login_request("alice@example.com", "Wr0ng-Password!x"))
            .await;
    }

    harness
        .auth
        .admin_reset_password(user_id, OTHER_STRONG_PASSWORD)
        .await
        .unwrap();

    let success = harness
        .auth
        .login(login_request("alice@example.com", OTHER_STRONG_PASSWORD))
        .await
        .expect("reset should have cleared the lockout");
    assert_eq!(success.user.user_id, user_id);
}

#[tokio::test]
async fn test_reset_keeps_lockout_when_policy_says_so() {
    let mut config = test_config();
    config.lockout.clear_lockout_on_reset = false;
    let harness = spawn_with_config(config);
    let user_id = register_user(&harness, "alice@example.com").await;

    for _ in 0..5 {
        let _ = harness
            .auth
            .login(login_request("alice@example.com", "Wr0ng-Password!x"))
            .await;
    }

    harness
        .auth
        .admin_reset_password(user_id, OTHER_STRONG_PASSWORD)
        .await
        .unwrap();

    let result = harness
        .auth
        .login(login_request("alice@example.com", OTHER_STRONG_PASSWORD))
        .await;
    assert!(matches!(result, Err(AuthError::AccountLocked { .. })));
}
