//! User model - identity records owned by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User identity record.
///
/// Mutated exclusively through the orchestrator; the RBAC and token
/// components only ever read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Normalized (lowercased) email, unique case-insensitively.
    pub email: String,
    /// None when the account only authenticates through a federated provider.
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
    pub roles: Vec<String>,
    pub mfa_enabled: bool,
    /// AES-256-GCM encrypted TOTP secret, active once MFA is enabled.
    pub mfa_secret: Option<String>,
    /// Encrypted secret awaiting the first valid code before activation.
    pub mfa_pending_secret: Option<String>,
    /// SHA-256 hashes of unused single-use backup codes.
    pub backup_code_hashes: Vec<String>,
    pub failed_login_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub external_identities: Vec<ExternalIdentityRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Link between a user and a federated identity provider account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentityRef {
    pub provider: String,
    pub external_user_id: String,
}

impl User {
    /// Create a new password-based user.
    pub fn new(email: String, password_hash: String, display_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash: Some(password_hash),
            display_name,
            roles: Vec::new(),
            mfa_enabled: false,
            mfa_secret: None,
            mfa_pending_secret: None,
            backup_code_hashes: Vec::new(),
            failed_login_count: 0,
            locked_until: None,
            external_identities: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a user provisioned from a federated identity (no password).
    pub fn new_federated(email: String, identity: ExternalIdentityRef) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash: None,
            display_name: None,
            roles: Vec::new(),
            mfa_enabled: false,
            mfa_secret: None,
            mfa_pending_secret: None,
            backup_code_hashes: Vec::new(),
            failed_login_count: 0,
            locked_until: None,
            external_identities: vec![identity],
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the account is currently locked out.
    pub fn is_locked(&self) -> bool {
        matches!(self.locked_until, Some(until) if until > Utc::now())
    }

    /// Convert to sanitized response (no credential material).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse {
            user_id: self.id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            roles: self.roles.clone(),
            mfa_enabled: self.mfa_enabled,
            created_at: self.created_at,
        }
    }
}

/// Request to register a new user.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    /// Caller address, used for registration rate limiting when present.
    pub ip_address: Option<String>,
}

/// Response after successful registration.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
}

/// Request to login with email/password.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub mfa_code: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
}

/// User response for API surfaces (no sensitive fields).
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub roles: Vec<String>,
    pub mfa_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Token pair returned after successful auth or refresh.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl TokenResponse {
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}
