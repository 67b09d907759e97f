//! MFA provider: TOTP codes, backup codes, and AES-256-GCM secret
//! encryption at rest.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::config::MfaConfig;
use crate::models::User;
use crate::services::error::AuthError;

const TOTP_DIGITS: usize = 6;
// RFC 6238: 30-second steps, one step of tolerance for clock drift
const TOTP_STEP_SECONDS: u64 = 30;
const TOTP_SKEW_STEPS: u8 = 1;
const BACKUP_CODE_BYTES: usize = 5;

/// Material returned from `setup`; nothing is active until `enable`
/// succeeds with a valid code.
#[derive(Debug, Serialize)]
pub struct MfaSetup {
    pub secret_base32: String,
    pub otpauth_uri: String,
    /// Shown exactly once; only their hashes are retained.
    pub backup_codes: Vec<String>,
}

/// Outcome of an MFA verification.
#[derive(Debug, Clone, Copy)]
pub struct MfaVerification {
    pub valid: bool,
    pub used_backup_code: bool,
}

#[derive(Clone)]
pub struct MfaService {
    issuer: String,
    backup_code_count: usize,
    encryption_key: [u8; 32],
}

impl MfaService {
    pub fn new(config: &MfaConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            backup_code_count: config.backup_code_count,
            encryption_key: config.encryption_key,
        }
    }

    /// Begin enrollment: generate a secret and backup codes, store them on
    /// the user as pending. The caller persists the mutated user.
    pub fn setup(&self, user: &mut User) -> Result<MfaSetup, AuthError> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP secret: {:?}", e)))?;

        let totp = self.totp(secret_bytes.clone(), &user.email)?;

        let mut backup_codes = Vec::with_capacity(self.backup_code_count);
        let mut backup_code_hashes = Vec::with_capacity(self.backup_code_count);
        for _ in 0..self.backup_code_count {
            let code = generate_backup_code();
            backup_code_hashes.push(hash_backup_code(&code));
            backup_codes.push(code);
        }

        user.mfa_pending_secret = Some(encrypt_secret(&self.encryption_key, &secret_bytes)?);
        user.backup_code_hashes = backup_code_hashes;

        Ok(MfaSetup {
            secret_base32: totp.get_secret_base32(),
            otpauth_uri: totp.get_url(),
            backup_codes,
        })
    }

    /// Activate the pending secret after the user proves possession with a
    /// live code. Returns false (leaving setup pending) on a wrong code.
    pub fn enable(&self, user: &mut User, code: &str) -> Result<bool, AuthError> {
        let Some(pending) = user.mfa_pending_secret.clone() else {
            return Err(AuthError::MfaRequired);
        };
        let secret_bytes = decrypt_secret(&self.encryption_key, &pending)?;

        if !self.check_code(secret_bytes, &user.email, code)? {
            return Ok(false);
        }

        user.mfa_secret = Some(pending);
        user.mfa_pending_secret = None;
        user.mfa_enabled = true;
        tracing::info!(user_id = %user.id, "MFA enabled");
        Ok(true)
    }

    /// Verify a live TOTP code or an unused backup code.
    ///
    /// A matching backup code is removed from the user's set immediately;
    /// the caller persists the mutation, making the code single-use.
    pub fn verify(&self, user: &mut User, code: &str) -> Result<MfaVerification, AuthError> {
        let Some(encrypted) = user.mfa_secret.clone() else {
            return Err(AuthError::MfaRequired);
        };

        let secret_bytes = decrypt_secret(&self.encryption_key, &encrypted)?;
        if self.check_code(secret_bytes, &user.email, code)? {
            return Ok(MfaVerification {
                valid: true,
                used_backup_code: false,
            });
        }

        let candidate = hash_backup_code(code.trim());
        let position = user.backup_code_hashes.iter().position(|stored| {
            stored.as_bytes().ct_eq(candidate.as_bytes()).into()
        });
        if let Some(position) = position {
            user.backup_code_hashes.remove(position);
            tracing::info!(user_id = %user.id, remaining = user.backup_code_hashes.len(),
                "Backup code consumed");
            return Ok(MfaVerification {
                valid: true,
                used_backup_code: true,
            });
        }

        Ok(MfaVerification {
            valid: false,
            used_backup_code: false,
        })
    }

    /// Deactivate MFA, discarding secrets and remaining backup codes.
    pub fn disable(&self, user: &mut User) {
        user.mfa_enabled = false;
        user.mfa_secret = None;
        user.mfa_pending_secret = None;
        user.backup_code_hashes.clear();
    }

    fn totp(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP, AuthError> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW_STEPS,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP init: {}", e)))
    }

    fn check_code(
        &self,
        secret_bytes: Vec<u8>,
        account: &str,
        code: &str,
    ) -> Result<bool, AuthError> {
        let totp = self.totp(secret_bytes, account)?;
        totp.check_current(code.trim())
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP clock: {}", e)))
    }
}

/// Encrypt a TOTP secret with AES-256-GCM.
///
/// Returns `base64(nonce || ciphertext || tag)`.
fn encrypt_secret(key: &[u8; 32], plaintext: &[u8]) -> Result<String, AuthError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("AES-GCM encrypt: {}", e)))?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

/// Decrypt an AES-256-GCM encrypted TOTP secret.
fn decrypt_secret(key: &[u8; 32], encoded: &str) -> Result<Vec<u8>, AuthError> {
    let combined = STANDARD
        .decode(encoded)
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("base64 decode: {}", e)))?;

    if combined.len() < 13 {
        return Err(AuthError::Internal(anyhow::anyhow!("ciphertext too short")));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(12);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("AES-GCM decrypt: {}", e)))
}

fn generate_backup_code() -> String {
    let mut bytes = [0u8; BACKUP_CODE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex = hex::encode_upper(bytes);
    format!("{}-{}", &hex[..5], &hex[5..])
}

fn hash_backup_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}
