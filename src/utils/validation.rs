use validator::ValidateEmail;

/// Maximum accepted email length (RFC 5321 limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Normalize an email address for storage and lookup.
///
/// Emails are unique case-insensitively; the lowercased form is the
/// canonical one everywhere in the core.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Check email syntax after normalization.
pub fn is_valid_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LENGTH && email.validate_email()
}
