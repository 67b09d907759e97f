use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::config::HashingConfig;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Newtype for a PHC-format password hash string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Outcome of verifying a password against a stored hash.
///
/// `needs_rehash` is set when the hash was produced with weaker cost
/// parameters than the current configuration; the caller should re-hash
/// and persist on the next successful login.
#[derive(Debug, Clone, Copy)]
pub struct VerifyOutcome {
    pub valid: bool,
    pub needs_rehash: bool,
}

fn argon2_instance(config: &HashingConfig) -> Result<Argon2<'static>, anyhow::Error> {
    let params = Params::new(
        config.memory_cost_kib,
        config.time_cost,
        config.parallelism,
        None,
    )
    .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {}", e))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password using Argon2id.
///
/// Salt is generated per call; the PHC string embeds the algorithm version
/// and cost parameters, so parameters can change without breaking old hashes.
pub fn hash_password(
    password: &Password,
    config: &HashingConfig,
) -> Result<PasswordHashString, anyhow::Error> {
    let argon2 = argon2_instance(config)?;
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a hash using constant-time comparison.
///
/// Errors only on a malformed hash string; a wrong password yields
/// `valid: false`.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
    config: &HashingConfig,
) -> Result<VerifyOutcome, anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    let valid = Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .is_ok();

    let needs_rehash = valid && hash_params_below(&parsed_hash, config);

    Ok(VerifyOutcome {
        valid,
        needs_rehash,
    })
}

/// Check whether the parameters embedded in a stored hash are weaker than
/// the configured ones.
fn hash_params_below(parsed: &PasswordHash<'_>, config: &HashingConfig) -> bool {
    match Params::try_from(parsed) {
        Ok(params) => {
            params.m_cost() < config.memory_cost_kib
                || params.t_cost() < config.time_cost
                || params.p_cost() < config.parallelism
        }
        // Unparseable params: treat as outdated so the hash gets replaced.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HashingConfig {
        HashingConfig {
            memory_cost_kib: 19456,
            time_cost: 2,
            parallelism: 1,
        }
    }

    #[test]
    fn test_hash_password() {
        let password = Password::new("mySecurePassword123");
        let hash = hash_password(&password, &config()).expect("Failed to hash password");

        assert!(!hash.as_str().is_empty());
        assert!(hash.as_str().starts_with("$argon2id$"));
    }

    #[test]
    fn test_verify_password_correct() {
        let password = Password::new("mySecurePassword123");
        let hash = hash_password(&password, &config()).expect("Failed to hash password");

        let outcome = verify_password(&password, &hash, &config()).unwrap();
        assert!(outcome.valid);
        assert!(!outcome.needs_rehash);
    }

    #[test]
    fn test_verify_password_incorrect() {
        let password = Password::new("mySecurePassword123");
        let hash = hash_password(&password, &config()).expect("Failed to hash password");

        let wrong = Password::new("wrongPassword");
        let outcome = verify_password(&wrong, &hash, &config()).unwrap();
        assert!(!outcome.valid);
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let password = Password::new("mySecurePassword123");
        let hash1 = hash_password(&password, &config()).unwrap();
        let hash2 = hash_password(&password, &config()).unwrap();

        // Random salt: same password, different hashes
        assert_ne!(hash1.as_str(), hash2.as_str());
        assert!(verify_password(&password, &hash1, &config()).unwrap().valid);
        assert!(verify_password(&password, &hash2, &config()).unwrap().valid);
    }

    #[test]
    fn test_needs_rehash_after_cost_increase() {
        let weak = HashingConfig {
            memory_cost_kib: 8192,
            time_cost: 1,
            parallelism: 1,
        };
        let password = Password::new("mySecurePassword123");
        let hash = hash_password(&password, &weak).unwrap();

        let outcome = verify_password(&password, &hash, &config()).unwrap();
        assert!(outcome.valid);
        assert!(outcome.needs_rehash);

        let outcome = verify_password(&password, &hash, &weak).unwrap();
        assert!(!outcome.needs_rehash);
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        let password = Password::new("whatever");
        let bad = PasswordHashString::new("not-a-phc-string");
        assert!(verify_password(&password, &bad, &config()).is_err());
    }
}
