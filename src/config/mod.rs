use std::env;

use crate::services::error::AuthError;

/// Top-level configuration for the auth core.
///
/// Every component receives its section at construction; nothing reads
/// globals, so tests can run several differently-configured cores in the
/// same process.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub environment: Environment,
    pub hashing: HashingConfig,
    pub password_policy: PasswordPolicyConfig,
    pub breach: BreachConfig,
    pub jwt: JwtConfig,
    pub mfa: MfaConfig,
    pub lockout: LockoutConfig,
    pub rate_limit: RateLimitConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

/// Argon2id cost parameters. Embedded in every produced hash so they can
/// be raised later without invalidating stored hashes.
#[derive(Debug, Clone)]
pub struct HashingConfig {
    pub memory_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone)]
pub struct PasswordPolicyConfig {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_number: bool,
    pub require_special: bool,
    pub reject_common: bool,
    pub reject_user_info: bool,
    /// How many previous hashes a new password is checked against.
    pub history_size: usize,
}

#[derive(Debug, Clone)]
pub struct BreachConfig {
    pub enabled: bool,
    /// When true, an unreachable breach service fails the operation
    /// instead of degrading to "unknown".
    pub strict: bool,
    pub timeout_ms: u64,
    pub api_base_url: String,
}

/// Signing algorithm choice. Asymmetric signing is required when access
/// tokens are verified by services that do not hold the signing secret.
#[derive(Debug, Clone)]
pub enum JwtKeys {
    Hs256 { secret: String },
    Rs256 {
        private_key_path: String,
        public_key_path: String,
    },
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub keys: JwtKeys,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct MfaConfig {
    pub issuer: String,
    pub backup_code_count: usize,
    /// AES-256-GCM key protecting TOTP secrets at rest.
    pub encryption_key: [u8; 32],
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub max_failed_attempts: u32,
    pub lockout_duration_minutes: i64,
    /// Whether a password reset clears an active lockout.
    pub clear_lockout_on_reset: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sliding inactivity window.
    pub idle_timeout_minutes: i64,
    /// Absolute cap on session lifetime regardless of activity.
    pub absolute_lifetime_hours: i64,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment = match env_str.to_lowercase().as_str() {
            "dev" => Environment::Dev,
            "prod" => Environment::Prod,
            other => {
                return Err(AuthError::Internal(anyhow::anyhow!(
                    "Invalid environment: {}",
                    other
                )))
            }
        };
        let is_prod = environment == Environment::Prod;

        let jwt_keys = match get_env("JWT_ALGORITHM", Some("hs256"), is_prod)?
            .to_lowercase()
            .as_str()
        {
            "hs256" => JwtKeys::Hs256 {
                secret: get_env("JWT_SECRET", None, true)?,
            },
            "rs256" => JwtKeys::Rs256 {
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, true)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, true)?,
            },
            other => {
                return Err(AuthError::Internal(anyhow::anyhow!(
                    "Unsupported JWT algorithm: {}",
                    other
                )))
            }
        };

        let encryption_key_hex = get_env("MFA_ENCRYPTION_KEY", None, true)?;
        let encryption_key = parse_encryption_key(&encryption_key_hex)?;

        let config = AuthConfig {
            environment,
            hashing: HashingConfig {
                memory_cost_kib: parse_env("ARGON2_MEMORY_KIB", "19456", is_prod)?,
                time_cost: parse_env("ARGON2_TIME_COST", "2", is_prod)?,
                parallelism: parse_env("ARGON2_PARALLELISM", "1", is_prod)?,
            },
            password_policy: PasswordPolicyConfig {
                min_length: parse_env("PASSWORD_MIN_LENGTH", "12", is_prod)?,
                max_length: parse_env("PASSWORD_MAX_LENGTH", "128", is_prod)?,
                require_uppercase: parse_env("PASSWORD_REQUIRE_UPPERCASE", "true", is_prod)?,
                require_lowercase: parse_env("PASSWORD_REQUIRE_LOWERCASE", "true", is_prod)?,
                require_number: parse_env("PASSWORD_REQUIRE_NUMBER", "true", is_prod)?,
                require_special: parse_env("PASSWORD_REQUIRE_SPECIAL", "true", is_prod)?,
                reject_common: parse_env("PASSWORD_REJECT_COMMON", "true", is_prod)?,
                reject_user_info: parse_env("PASSWORD_REJECT_USER_INFO", "true", is_prod)?,
                history_size: parse_env("PASSWORD_HISTORY_SIZE", "5", is_prod)?,
            },
            breach: BreachConfig {
                enabled: parse_env("BREACH_CHECK_ENABLED", "true", is_prod)?,
                strict: parse_env("BREACH_CHECK_STRICT", "false", is_prod)?,
                timeout_ms: parse_env("BREACH_CHECK_TIMEOUT_MS", "3000", is_prod)?,
                api_base_url: get_env(
                    "BREACH_CHECK_API_URL",
                    Some("https://api.pwnedpasswords.com"),
                    is_prod,
                )?,
            },
            jwt: JwtConfig {
                keys: jwt_keys,
                issuer: get_env("JWT_ISSUER", Some("auth-core"), is_prod)?,
                audience: get_env("JWT_AUDIENCE", Some("auth-core-clients"), is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "15",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    "7",
                    is_prod,
                )?,
            },
            mfa: MfaConfig {
                issuer: get_env("MFA_ISSUER", Some("auth-core"), is_prod)?,
                backup_code_count: parse_env("MFA_BACKUP_CODE_COUNT", "10", is_prod)?,
                encryption_key,
            },
            lockout: LockoutConfig {
                max_failed_attempts: parse_env("LOCKOUT_MAX_FAILED_ATTEMPTS", "5", is_prod)?,
                lockout_duration_minutes: parse_env("LOCKOUT_DURATION_MINUTES", "15", is_prod)?,
                clear_lockout_on_reset: parse_env("LOCKOUT_CLEAR_ON_RESET", "true", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "10", is_prod)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", is_prod)?,
                register_attempts: parse_env("RATE_LIMIT_REGISTER_ATTEMPTS", "5", is_prod)?,
                register_window_seconds: parse_env(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    "3600",
                    is_prod,
                )?,
            },
            session: SessionConfig {
                idle_timeout_minutes: parse_env("SESSION_IDLE_TIMEOUT_MINUTES", "60", is_prod)?,
                absolute_lifetime_hours: parse_env("SESSION_ABSOLUTE_LIFETIME_HOURS", "720", is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AuthError> {
        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }
        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }
        if self.password_policy.min_length > self.password_policy.max_length {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "PASSWORD_MIN_LENGTH must not exceed PASSWORD_MAX_LENGTH"
            )));
        }
        if self.lockout.max_failed_attempts == 0 {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "LOCKOUT_MAX_FAILED_ATTEMPTS must be greater than 0"
            )));
        }
        if self.hashing.parallelism == 0 || self.hashing.time_cost == 0 {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "Argon2 cost parameters must be greater than 0"
            )));
        }
        Ok(())
    }
}

fn parse_encryption_key(hex_key: &str) -> Result<[u8; 32], AuthError> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("MFA_ENCRYPTION_KEY: {}", e)))?;
    bytes.try_into().map_err(|_| {
        AuthError::Internal(anyhow::anyhow!(
            "MFA_ENCRYPTION_KEY must be 32 bytes (64 hex characters)"
        ))
    })
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AuthError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AuthError::Internal(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AuthError::Internal(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AuthError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?.parse().map_err(|e| {
        AuthError::Internal(anyhow::anyhow!("{}: {}", key, e))
    })
}
