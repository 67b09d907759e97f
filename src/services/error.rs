use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::services::policy::PolicyError;
use crate::services::repository::RepositoryError;
use crate::services::store::StoreError;

/// Error taxonomy of the auth core.
///
/// Variants carry the internal reason; callers relaying them to end users
/// should go through [`AuthError::public_message`], which keeps messaging
/// uniform for the credential-class failures so the failing factor is not
/// leaked.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("MFA code required")]
    MfaRequired,

    #[error("Invalid MFA code")]
    MfaInvalid,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    /// Security-significant: a retired refresh token was presented again.
    /// Handling always revokes the whole token family.
    #[error("Refresh token reuse detected")]
    TokenReused,

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Password policy violation")]
    PolicyViolation { violations: Vec<PolicyError> },

    #[error("Password appears in {count} known breaches")]
    BreachDetected { count: u64 },

    /// Configuration-time only: rejected when writing a role definition.
    #[error("Role inheritance cycle: {path}")]
    RoleCycle { path: String },

    #[error("Unknown role: {name}")]
    UnknownRole { name: String },

    #[error("Unknown credential provider: {name}")]
    UnknownProvider { name: String },

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Email already registered")]
    EmailTaken,

    #[error("User not found")]
    UserNotFound,

    #[error("Store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Externally safe message. Credential-class failures collapse to one
    /// string; the precise variant stays in logs only.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials
            | AuthError::AccountLocked { .. }
            | AuthError::MfaInvalid
            | AuthError::UserNotFound => "Authentication failed",
            AuthError::RateLimited { .. } => "Too many requests, try again later",
            AuthError::MfaRequired => "MFA code required",
            AuthError::TokenExpired => "Token expired",
            AuthError::TokenInvalid | AuthError::TokenReused => "Invalid token",
            AuthError::PermissionDenied { .. } => "Permission denied",
            AuthError::PolicyViolation { .. } => "Password does not meet policy requirements",
            AuthError::BreachDetected { .. } => "Password has appeared in a known data breach",
            AuthError::RoleCycle { .. } => "Role inheritance must be acyclic",
            AuthError::UnknownRole { .. } => "Unknown role",
            AuthError::UnknownProvider { .. } => "Unknown credential provider",
            AuthError::InvalidEmail => "Invalid email address",
            AuthError::EmailTaken => "Email already registered",
            AuthError::StoreUnavailable(_) | AuthError::Internal(_) => "Internal error",
        }
    }

    /// Whether this error should be logged as a security event.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            AuthError::TokenReused | AuthError::AccountLocked { .. }
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => AuthError::StoreUnavailable(e),
            StoreError::Corrupt(e) => AuthError::Internal(e),
        }
    }
}

impl From<RepositoryError> for AuthError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::DuplicateEmail => AuthError::EmailTaken,
            RepositoryError::Unavailable(e) => AuthError::StoreUnavailable(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_credential_messaging() {
        let invalid = AuthError::InvalidCredentials.public_message();
        let locked = AuthError::AccountLocked { until: Utc::now() }.public_message();
        let mfa = AuthError::MfaInvalid.public_message();
        let missing = AuthError::UserNotFound.public_message();
        assert_eq!(invalid, locked);
        assert_eq!(invalid, mfa);
        assert_eq!(invalid, missing);
    }

    #[test]
    fn test_token_reuse_is_security_event() {
        assert!(AuthError::TokenReused.is_security_event());
        assert!(!AuthError::TokenExpired.is_security_event());
    }
}
