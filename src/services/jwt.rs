use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use uuid::Uuid;

use crate::config::{JwtConfig, JwtKeys};
use crate::models::User;
use crate::services::error::AuthError;

/// JWT service for access-token issuance and stateless verification.
///
/// Verification is pure (no I/O), so it is safe to call from any number of
/// concurrent request handlers. Refresh tokens are opaque values bound to a
/// session; only their hash is ever persisted.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

/// Claims for access tokens (short-lived, self-contained).
///
/// Carries a snapshot of the resolved permissions so ordinary request
/// authorization needs no RBAC lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub email: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    pub jti: String,
    /// Session / token-family id this token belongs to
    pub sid: String,
    pub roles: Vec<String>,
    /// Resolved permission patterns at issuance time
    pub perms: Vec<String>,
}

impl JwtService {
    /// Create a new JWT service from configuration.
    ///
    /// HS256 derives both keys from the shared secret; RS256 loads a PEM
    /// key pair so holders of the public key alone can verify.
    pub fn new(config: &JwtConfig) -> Result<Self, AuthError> {
        let (encoding_key, decoding_key, algorithm) = match &config.keys {
            JwtKeys::Hs256 { secret } => (
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
                Algorithm::HS256,
            ),
            JwtKeys::Rs256 {
                private_key_path,
                public_key_path,
            } => {
                let private_pem = fs::read_to_string(private_key_path).map_err(|e| {
                    AuthError::Internal(anyhow::anyhow!(
                        "Failed to read private key from {}: {}",
                        private_key_path,
                        e
                    ))
                })?;
                let public_pem = fs::read_to_string(public_key_path).map_err(|e| {
                    AuthError::Internal(anyhow::anyhow!(
                        "Failed to read public key from {}: {}",
                        public_key_path,
                        e
                    ))
                })?;
                (
                    EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(|e| {
                        AuthError::Internal(anyhow::anyhow!("Failed to parse private key: {}", e))
                    })?,
                    DecodingKey::from_rsa_pem(public_pem.as_bytes()).map_err(|e| {
                        AuthError::Internal(anyhow::anyhow!("Failed to parse public key: {}", e))
                    })?,
                    Algorithm::RS256,
                )
            }
        };

        tracing::info!(algorithm = ?algorithm, "JWT service initialized");

        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        })
    }

    /// Issue an access token for a user with a resolved-permission snapshot.
    pub fn issue_access_token(
        &self,
        user: &User,
        permissions: Vec<String>,
        session_id: Uuid,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user.id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            email: user.email.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            sid: session_id.to_string(),
            roles: user.roles.clone(),
            perms: permissions,
        };

        let header = Header::new(self.algorithm);
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    /// Issue an opaque refresh token bound to a session.
    ///
    /// Format: `<session id>.<random>`; the session id prefix lets the
    /// session manager find the record, the random part carries the entropy.
    pub fn issue_refresh_token(&self, session_id: Uuid) -> String {
        let mut entropy = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut entropy);
        format!(
            "{}.{}",
            session_id.simple(),
            URL_SAFE_NO_PAD.encode(entropy)
        )
    }

    /// Extract the session id prefix of an opaque refresh token.
    pub fn refresh_token_session_id(token: &str) -> Result<Uuid, AuthError> {
        let (session_part, _) = token.split_once('.').ok_or(AuthError::TokenInvalid)?;
        Uuid::parse_str(session_part).map_err(|_| AuthError::TokenInvalid)
    }

    /// SHA-256 hash of a token, the only form ever persisted.
    pub fn hash_token(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    /// Verify and decode an access token. Pure; never touches storage.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let token_data =
            decode::<AccessTokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::TokenInvalid,
                }
            })?;

        Ok(token_data.claims)
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    pub fn refresh_token_expiry_days(&self) -> i64 {
        self.refresh_token_expiry_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hs256_config() -> JwtConfig {
        JwtConfig {
            keys: JwtKeys::Hs256 {
                secret: "test-secret-with-enough-entropy-for-hs256".to_string(),
            },
            issuer: "auth-core".to_string(),
            audience: "auth-core-clients".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        }
    }

    fn test_user() -> User {
        let mut user = User::new("test@example.com".into(), "$argon2id$stub".into(), None);
        user.roles = vec!["editor".to_string()];
        user
    }

    #[test]
    fn test_access_token_roundtrip() {
        let service = JwtService::new(&hs256_config()).unwrap();
        let user = test_user();
        let session_id = Uuid::new_v4();

        let token = service
            .issue_access_token(&user, vec!["docs:write".to_string()], session_id)
            .unwrap();
        let claims = service.verify_access_token(&token).unwrap();

        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.sid, session_id.to_string());
        assert_eq!(claims.roles, vec!["editor".to_string()]);
        assert_eq!(claims.perms, vec!["docs:write".to_string()]);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let service = JwtService::new(&hs256_config()).unwrap();
        let token = service
            .issue_access_token(&test_user(), vec![], Uuid::new_v4())
            .unwrap();

        let mut tampered = token.clone();
        tampered.pop();
        assert!(matches!(
            service.verify_access_token(&tampered),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let service = JwtService::new(&hs256_config()).unwrap();
        let mut other_config = hs256_config();
        other_config.audience = "someone-else".to_string();
        let other = JwtService::new(&other_config).unwrap();

        let token = other
            .issue_access_token(&test_user(), vec![], Uuid::new_v4())
            .unwrap();
        assert!(matches!(
            service.verify_access_token(&token),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn test_refresh_token_format() {
        let service = JwtService::new(&hs256_config()).unwrap();
        let session_id = Uuid::new_v4();

        let token = service.issue_refresh_token(session_id);
        assert_eq!(
            JwtService::refresh_token_session_id(&token).unwrap(),
            session_id
        );
        // Two tokens for the same session differ
        assert_ne!(token, service.issue_refresh_token(session_id));
    }

    #[test]
    fn test_malformed_refresh_token() {
        assert!(matches!(
            JwtService::refresh_token_session_id("no-separator"),
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            JwtService::refresh_token_session_id("not-a-uuid.random"),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn test_hash_token_deterministic() {
        let a = JwtService::hash_token("token-a");
        assert_eq!(a, JwtService::hash_token("token-a"));
        assert_ne!(a, JwtService::hash_token("token-b"));
        assert_eq!(a.len(), 64);
    }
}
