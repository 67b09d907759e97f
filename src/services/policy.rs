//! Password policy validation service.
//!
//! Validates candidate passwords against the configured policy: length,
//! character classes, common-password and user-information rejection, and
//! reuse against the stored hash history.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::config::{HashingConfig, PasswordPolicyConfig};
use crate::utils::{verify_password, Password, PasswordHashString};

/// Characters counted as "special" for the character-class requirement.
pub const SPECIAL_CHARS: &str = "!@#$%^&*()-_=+[]{}|\\;:'\",.<>/?`~";

/// Passwords rejected outright regardless of other rules.
static COMMON_PASSWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password", "password1", "password123", "passw0rd", "p@ssw0rd", "p@ssword",
        "123456", "1234567", "12345678", "123456789", "1234567890", "12345",
        "qwerty", "qwerty123", "qwertyuiop", "azerty", "asdfgh", "zxcvbnm",
        "abc123", "abcd1234", "iloveyou", "welcome", "welcome1", "letmein",
        "admin", "administrator", "root", "toor", "changeme", "default",
        "secret", "dragon", "monkey", "sunshine", "princess", "football",
        "baseball", "superman", "batman", "trustno1", "master", "shadow",
        "michael", "jennifer", "charlie", "donald", "freedom", "whatever",
        "qazwsx", "password!", "passw0rd!", "starwars", "pokemon", "cheese",
        "computer", "internet", "login", "access", "hello123", "summer2024",
    ]
    .into_iter()
    .collect()
});

/// Single policy violation. `Display` strings are safe to show to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    TooShort { min_length: usize, actual_length: usize },
    TooLong { max_length: usize, actual_length: usize },
    MissingUppercase,
    MissingLowercase,
    MissingNumber,
    MissingSpecial,
    CommonPassword,
    ContainsUserInfo,
    RecentlyUsed,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::TooShort {
                min_length,
                actual_length,
            } => write!(
                f,
                "Password must be at least {} characters (got {})",
                min_length, actual_length
            ),
            PolicyError::TooLong {
                max_length,
                actual_length,
            } => write!(
                f,
                "Password must be at most {} characters (got {})",
                max_length, actual_length
            ),
            PolicyError::MissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            PolicyError::MissingLowercase => {
                write!(f, "Password must contain at least one lowercase letter")
            }
            PolicyError::MissingNumber => {
                write!(f, "Password must contain at least one number")
            }
            PolicyError::MissingSpecial => {
                write!(f, "Password must contain at least one special character")
            }
            PolicyError::CommonPassword => {
                write!(f, "Password is too common")
            }
            PolicyError::ContainsUserInfo => {
                write!(f, "Password must not contain your email or name")
            }
            PolicyError::RecentlyUsed => {
                write!(f, "Password was used recently; choose a different one")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Strength tiers derived from the 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrengthTier {
    Weak,
    Fair,
    Strong,
    VeryStrong,
}

impl StrengthTier {
    fn from_score(score: u8) -> Self {
        match score {
            0..=39 => StrengthTier::Weak,
            40..=69 => StrengthTier::Fair,
            70..=89 => StrengthTier::Strong,
            _ => StrengthTier::VeryStrong,
        }
    }
}

/// Full validation result: all violations at once, plus a score.
#[derive(Debug, Clone)]
pub struct PasswordValidation {
    pub valid: bool,
    pub errors: Vec<PolicyError>,
    pub score: u8,
    pub strength: StrengthTier,
}

/// User-derived fragments a password must not contain.
#[derive(Debug, Clone, Default)]
pub struct PasswordContext<'a> {
    pub email: Option<&'a str>,
    pub display_name: Option<&'a str>,
}

/// Password policy validation service.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    config: PasswordPolicyConfig,
}

impl PasswordPolicy {
    pub fn new(config: PasswordPolicyConfig) -> Self {
        Self { config }
    }

    pub fn history_size(&self) -> usize {
        self.config.history_size
    }

    /// Validate a password, reporting every violated rule.
    pub fn validate(&self, password: &str, context: &PasswordContext<'_>) -> PasswordValidation {
        let mut errors = Vec::new();
        let length = password.chars().count();

        if length < self.config.min_length {
            errors.push(PolicyError::TooShort {
                min_length: self.config.min_length,
                actual_length: length,
            });
        }
        if length > self.config.max_length {
            errors.push(PolicyError::TooLong {
                max_length: self.config.max_length,
                actual_length: length,
            });
        }
        if self.config.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push(PolicyError::MissingUppercase);
        }
        if self.config.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            errors.push(PolicyError::MissingLowercase);
        }
        if self.config.require_number && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push(PolicyError::MissingNumber);
        }
        if self.config.require_special && !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            errors.push(PolicyError::MissingSpecial);
        }
        if self.config.reject_common && COMMON_PASSWORDS.contains(password.to_lowercase().as_str())
        {
            errors.push(PolicyError::CommonPassword);
        }
        if self.config.reject_user_info && contains_user_info(password, context) {
            errors.push(PolicyError::ContainsUserInfo);
        }

        let score = score_password(password, &errors);
        PasswordValidation {
            valid: errors.is_empty(),
            errors,
            score,
            strength: StrengthTier::from_score(score),
        }
    }

    /// Check a candidate against the stored hash history via `verify`, never
    /// against plaintext.
    pub fn is_recent_reuse(
        &self,
        password: &str,
        history: &[String],
        hashing: &HashingConfig,
    ) -> bool {
        let candidate = Password::new(password);
        history.iter().any(|hash| {
            verify_password(&candidate, &PasswordHashString::new(hash.clone()), hashing)
                .map(|outcome| outcome.valid)
                .unwrap_or(false)
        })
    }
}

fn contains_user_info(password: &str, context: &PasswordContext<'_>) -> bool {
    let lowered = password.to_lowercase();

    if let Some(email) = context.email {
        if let Some(local) = email.to_lowercase().split('@').next() {
            if local.len() >= 3 && lowered.contains(local) {
                return true;
            }
        }
    }
    if let Some(name) = context.display_name {
        for fragment in name.to_lowercase().split_whitespace() {
            if fragment.len() >= 3 && lowered.contains(fragment) {
                return true;
            }
        }
    }
    false
}

/// Score 0-100: length and character variety add, rule violations subtract.
fn score_password(password: &str, errors: &[PolicyError]) -> u8 {
    let length = password.chars().count();
    let mut score: i32 = 0;

    // Up to 50 points for length
    score += (length.min(20) as i32) * 5 / 2;

    let classes = [
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| SPECIAL_CHARS.contains(c)),
    ]
    .iter()
    .filter(|present| **present)
    .count() as i32;
    score += classes * 10;

    // Variety of distinct characters, up to 10 points
    let distinct = password.chars().collect::<HashSet<_>>().len();
    score += distinct.min(10) as i32;

    score -= errors.len() as i32 * 15;
    if errors.contains(&PolicyError::CommonPassword) {
        score = score.min(10);
    }

    score.clamp(0, 100) as u8
}
