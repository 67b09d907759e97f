//! Breach-check contract: only a five-character digest prefix crosses the
//! process boundary, and availability failures never block the flow unless
//! strict mode says so.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use auth_core::services::{AuthError, BreachRangeClient, VerifierRegistry};
use common::*;
use sha2::{Digest, Sha256};

struct RecordingClient {
    prefixes: Mutex<Vec<String>>,
    range: Vec<(String, u64)>,
}

impl RecordingClient {
    fn empty() -> Self {
        Self {
            prefixes: Mutex::new(Vec::new()),
            range: Vec::new(),
        }
    }

    fn knowing(password: &str, count: u64) -> Self {
        let digest = hex::encode_upper(Sha256::digest(password.as_bytes()));
        Self {
            prefixes: Mutex::new(Vec::new()),
            range: vec![(digest[5..].to_string(), count)],
        }
    }
}

#[async_trait]
impl BreachRangeClient for RecordingClient {
    async fn fetch_range(&self, prefix: &str) -> Result<Vec<(String, u64)>, anyhow::Error> {
        self.prefixes.lock().unwrap().push(prefix.to_string());
        Ok(self.range.clone())
    }
}

struct UnreachableClient;

#[async_trait]
impl BreachRangeClient for UnreachableClient {
    async fn fetch_range(&self, _prefix: &str) -> Result<Vec<(String, u64)>, anyhow::Error> {
        Err(anyhow::anyhow!("connection timed out"))
    }
}

#[tokio::test]
async fn test_request_payload_is_exactly_a_five_char_prefix() {
    let client = Arc::new(RecordingClient::empty());
    let harness = spawn_with(test_config(), client.clone(), VerifierRegistry::new());

    register_user(&harness, "alice@example.com").await;

    let digest = hex::encode_upper(Sha256::digest(STRONG_PASSWORD.as_bytes()));
    let prefixes = client.prefixes.lock().unwrap();
    assert_eq!(prefixes.len(), 1);
    assert_eq!(prefixes[0].len(), 5);
    assert_eq!(prefixes[0], digest[..5]);
    // Never the whole digest, never the password
    assert_ne!(prefixes[0], digest);
    assert!(!prefixes[0].contains(STRONG_PASSWORD));
}

#[tokio::test]
async fn test_breached_password_blocks_registration() {
    let client = Arc::new(RecordingClient::knowing(STRONG_PASSWORD, 1337));
    let harness = spawn_with(test_config(), client, VerifierRegistry::new());

    let result = harness
        .auth
        .register(register_request("alice@example.com", STRONG_PASSWORD))
        .await;
    assert!(matches!(
        result,
        Err(AuthError::BreachDetected { count: 1337 })
    ));
}

#[tokio::test]
async fn test_breached_password_blocks_change() {
    let client = Arc::new(RecordingClient::knowing(OTHER_STRONG_PASSWORD, 2));
    let harness = spawn_with(test_config(), client, VerifierRegistry::new());
    let user_id = register_user(&harness, "alice@example.com").await;

    let result = harness
        .auth
        .change_password(user_id, STRONG_PASSWORD, OTHER_STRONG_PASSWORD)
        .await;
    assert!(matches!(result, Err(AuthError::BreachDetected { .. })));
}

#[tokio::test]
async fn test_unreachable_service_fails_open_by_default() {
    let harness = spawn_with(
        test_config(),
        Arc::new(UnreachableClient),
        VerifierRegistry::new(),
    );

    // Default policy: unknown is allowed through
    register_user(&harness, "alice@example.com").await;
    login_user(&harness, "alice@example.com").await;
}

#[tokio::test]
async fn test_unreachable_service_fails_closed_in_strict_mode() {
    let mut config = test_config();
    config.breach.strict = true;
    let harness = spawn_with(config, Arc::new(UnreachableClient), VerifierRegistry::new());

    let result = harness
        .auth
        .register(register_request("alice@example.com", STRONG_PASSWORD))
        .await;
    assert!(matches!(result, Err(AuthError::StoreUnavailable(_))));
}

#[tokio::test]
async fn test_disabled_breach_check_never_calls_out() {
    let mut config = test_config();
    config.breach.enabled = false;
    let client = Arc::new(RecordingClient::empty());
    let harness = spawn_with(config, client.clone(), VerifierRegistry::new());

    register_user(&harness, "alice@example.com").await;
    assert!(client.prefixes.lock().unwrap().is_empty());
}
