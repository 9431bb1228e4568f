//! Syntactic checks on submitted fields. Runs before any I/O.
use regex::Regex;
use std::sync::LazyLock;

/// Minimum name length in UTF-16 code units, the unit browsers count in.
pub const MIN_NAME_LEN: usize = 3;

// Deliberately lax: anything@anything.anything without whitespace or extra `@`.
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Valid,
    InvalidName,
    InvalidEmail,
}

/// Checks the name first, so a submission with both fields wrong reports
/// `InvalidName`.
pub fn validate(name: Option<&str>, email: Option<&str>) -> Validation {
    match (name, email) {
        (Some(name), _) if name.encode_utf16().count() < MIN_NAME_LEN => Validation::InvalidName,
        (None, _) => Validation::InvalidName,
        (_, Some(email)) if EMAIL_PATTERN.is_match(email) => Validation::Valid,
        _ => Validation::InvalidEmail,
    }
}
