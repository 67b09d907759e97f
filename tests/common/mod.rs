//! Test helper module for auth-core integration tests.
//!
//! Builds an [`AuthService`] over the in-memory store and repositories,
//! with fast hashing parameters so the suite stays quick.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use auth_core::config::{
    AuthConfig, BreachConfig, Environment, HashingConfig, JwtConfig, JwtKeys, LockoutConfig,
    MfaConfig, PasswordPolicyConfig, RateLimitConfig, SessionConfig,
};
use auth_core::models::{LoginRequest, RegisterRequest};
use auth_core::services::{
    AuthService, BreachRangeClient, InMemoryRoleRepository, InMemoryUserRepository, LoginSuccess,
    MemoryStore, VerifierRegistry,
};
use uuid::Uuid;

pub const STRONG_PASSWORD: &str = "Str0ngP@ssw0rd!2024";
pub const OTHER_STRONG_PASSWORD: &str = "An0ther#Secret-99";

/// Breach client that knows nothing: every password reads as clear.
pub struct EmptyBreachClient;

#[async_trait]
impl BreachRangeClient for EmptyBreachClient {
    async fn fetch_range(&self, _prefix: &str) -> Result<Vec<(String, u64)>, anyhow::Error> {
        Ok(Vec::new())
    }
}

pub struct TestAuth {
    pub auth: AuthService,
    pub users: Arc<InMemoryUserRepository>,
    pub roles: Arc<InMemoryRoleRepository>,
    pub store: Arc<MemoryStore>,
}

pub fn test_config() -> AuthConfig {
    AuthConfig {
        environment: Environment::Dev,
        hashing: HashingConfig {
            // Cheap parameters keep the suite fast
            memory_cost_kib: 8192,
            time_cost: 1,
            parallelism: 1,
        },
        password_policy: PasswordPolicyConfig {
            min_length: 12,
            max_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_number: true,
            require_special: true,
            reject_common: true,
            reject_user_info: true,
            history_size: 5,
        },
        breach: BreachConfig {
            enabled: true,
            strict: false,
            timeout_ms: 1000,
            api_base_url: "http://localhost:0".to_string(),
        },
        jwt: JwtConfig {
            keys: JwtKeys::Hs256 {
                secret: "integration-test-secret-with-plenty-of-entropy".to_string(),
            },
            issuer: "auth-core".to_string(),
            audience: "auth-core-clients".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        },
        mfa: MfaConfig {
            issuer: "auth-core".to_string(),
            backup_code_count: 10,
            encryption_key: [7u8; 32],
        },
        lockout: LockoutConfig {
            max_failed_attempts: 5,
            lockout_duration_minutes: 15,
            clear_lockout_on_reset: true,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 900,
            register_attempts: 100,
            register_window_seconds: 3600,
        },
        session: SessionConfig {
            idle_timeout_minutes: 60,
            absolute_lifetime_hours: 720,
        },
    }
}

pub fn spawn() -> TestAuth {
    spawn_with(test_config(), Arc::new(EmptyBreachClient), VerifierRegistry::new())
}

pub fn spawn_with_config(config: AuthConfig) -> TestAuth {
    spawn_with(config, Arc::new(EmptyBreachClient), VerifierRegistry::new())
}

pub fn spawn_with(
    config: AuthConfig,
    breach_client: Arc<dyn BreachRangeClient>,
    verifiers: VerifierRegistry,
) -> TestAuth {
    let users = Arc::new(InMemoryUserRepository::new());
    let roles = Arc::new(InMemoryRoleRepository::new());
    let store = Arc::new(MemoryStore::new());

    let auth = AuthService::new(
        config,
        users.clone(),
        roles.clone(),
        store.clone(),
        breach_client,
        verifiers,
    )
    .expect("Failed to build AuthService");

    TestAuth {
        auth,
        users,
        roles,
        store,
    }
}

pub fn register_request(email: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        password: password.to_string(),
        display_name: None,
        ip_address: Some("127.0.0.1".to_string()),
    }
}

pub fn login_request(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
        mfa_code: None,
        ip_address: "127.0.0.1".to_string(),
        user_agent: "integration-tests".to_string(),
    }
}

pub async fn register_user(harness: &TestAuth, email: &str) -> Uuid {
    harness
        .auth
        .register(register_request(email, STRONG_PASSWORD))
        .await
        .expect("registration failed")
        .user_id
}

pub async fn login_user(harness: &TestAuth, email: &str) -> LoginSuccess {
    harness
        .auth
        .login(login_request(email, STRONG_PASSWORD))
        .await
        .expect("login failed")
}
