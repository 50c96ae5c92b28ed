//! Input validation for slot ids, URLs and numeric configuration.
//!
//! Every validator is a pure function returning `Ok(())` or a
//! [`ValidationError`] carrying a stable code. Nothing here panics; callers that
//! want to bail out early just use `?`.

use std::fmt;
use thiserror::Error;
use url::Url;

pub const SLOT_ID_MAX_LENGTH: usize = 100;
pub const CSP_NONCE_MAX_LENGTH: usize = 128;

/// Schemes that are never allowed in URLs reaching the page.
pub const DANGEROUS_SCHEMES: &[&str] = &[
    "javascript:",
    "data:",
    "vbscript:",
    "file:",
    "chrome-extension:",
    "moz-extension:",
];

/// Base used to check root- and protocol-relative URLs.
const RELATIVE_BASE: &str = "http://dummy-base.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorCode {
    EmptySlotId,
    InvalidSlotIdFormat,
    SlotIdTooLong,
    InvalidUrl,
    InvalidType,
    OutOfRange,
    InvalidNonceFormat,
    NonceTooLong,
}

impl ValidationErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorCode::EmptySlotId => "EMPTY_SLOT_ID",
            ValidationErrorCode::InvalidSlotIdFormat => "INVALID_SLOT_ID_FORMAT",
            ValidationErrorCode::SlotIdTooLong => "SLOT_ID_TOO_LONG",
            ValidationErrorCode::InvalidUrl => "INVALID_URL",
            ValidationErrorCode::InvalidType => "INVALID_TYPE",
            ValidationErrorCode::OutOfRange => "OUT_OF_RANGE",
            ValidationErrorCode::InvalidNonceFormat => "INVALID_NONCE_FORMAT",
            ValidationErrorCode::NonceTooLong => "NONCE_TOO_LONG",
        }
    }
}

impl fmt::Display for ValidationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected input, with a machine-readable code and a human message.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: ValidationErrorCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ValidationErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Prefix the message with the name of the field that failed.
    pub fn for_field(mut self, field: &str) -> Self {
        self.message = format!("{}: {}", field, self.message);
        self
    }
}

pub type Validation = Result<(), ValidationError>;

/// Validate a slot id.
///
/// Must be 1-100 characters, start with an ASCII letter and contain only
/// letters, digits, hyphens and underscores.
pub fn validate_slot_id(slot_id: &str) -> Validation {
    if slot_id.is_empty() {
        return Err(ValidationError::new(
            ValidationErrorCode::EmptySlotId,
            "Slot ID cannot be empty",
        ));
    }

    if slot_id.chars().count() > SLOT_ID_MAX_LENGTH {
        return Err(ValidationError::new(
            ValidationErrorCode::SlotIdTooLong,
            format!("Slot ID cannot exceed {} characters", SLOT_ID_MAX_LENGTH),
        ));
    }

    let mut chars = slot_id.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if !starts_with_letter || !rest_ok {
        return Err(ValidationError::new(
            ValidationErrorCode::InvalidSlotIdFormat,
            "Slot ID must start with a letter and contain only letters, numbers, hyphens, and underscores",
        ));
    }

    Ok(())
}

/// True if the value starts with one of [`DANGEROUS_SCHEMES`], ignoring case
/// and surrounding whitespace.
pub fn has_dangerous_scheme(value: &str) -> bool {
    let trimmed = value.trim().to_ascii_lowercase();
    DANGEROUS_SCHEMES
        .iter()
        .any(|scheme| trimmed.starts_with(scheme))
}

/// Validate a URL: non-empty, no denylisted scheme, and parseable either as an
/// absolute URL or relative to a root (`/x`, `//host/x`, `./x`).
pub fn validate_url(url: &str) -> Validation {
    if url.is_empty() {
        return Err(ValidationError::new(
            ValidationErrorCode::InvalidUrl,
            "URL cannot be empty",
        ));
    }

    if has_dangerous_scheme(url) {
        return Err(ValidationError::new(
            ValidationErrorCode::InvalidUrl,
            "URL contains dangerous protocol",
        ));
    }

    let parsed = if url.starts_with('/') || url.starts_with('.') {
        Url::parse(RELATIVE_BASE).and_then(|base| base.join(url))
    } else {
        Url::parse(url)
    };

    parsed.map(|_| ()).map_err(|e| {
        ValidationError::new(
            ValidationErrorCode::InvalidUrl,
            format!("Invalid URL format: {}", e),
        )
    })
}

/// Validate the delivery API endpoint.
pub fn validate_api_endpoint(endpoint: &str) -> Validation {
    validate_url(endpoint)
}

/// Validate that `value` is finite and within `[min, max]`.
pub fn validate_number_range(value: f64, min: f64, max: f64) -> Validation {
    if !value.is_finite() {
        return Err(ValidationError::new(
            ValidationErrorCode::InvalidType,
            "Value must be a number",
        ));
    }

    if value < min || value > max {
        return Err(ValidationError::new(
            ValidationErrorCode::OutOfRange,
            format!("Value must be between {} and {}", min, max),
        ));
    }

    Ok(())
}

/// Request timeout: 100-60000 ms.
pub fn validate_api_timeout(timeout: f64) -> Validation {
    validate_number_range(timeout, 100.0, 60_000.0)
}

/// Cache TTL: 0-3600000 ms.
pub fn validate_cache_ttl(ttl: f64) -> Validation {
    validate_number_range(ttl, 0.0, 3_600_000.0)
}

/// Extra retry attempts: 0-10.
pub fn validate_retry_attempts(attempts: f64) -> Validation {
    validate_number_range(attempts, 0.0, 10.0)
}

/// Base retry delay: 100-60000 ms.
pub fn validate_retry_delay(delay: f64) -> Validation {
    validate_number_range(delay, 100.0, 60_000.0)
}

/// Validate a CSP nonce. Empty is fine (the nonce is optional).
pub fn validate_csp_nonce(nonce: &str) -> Validation {
    if nonce.is_empty() {
        return Ok(());
    }

    if nonce.chars().count() > CSP_NONCE_MAX_LENGTH {
        return Err(ValidationError::new(
            ValidationErrorCode::NonceTooLong,
            format!("Nonce cannot exceed {} characters", CSP_NONCE_MAX_LENGTH),
        ));
    }

    if !nonce
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::new(
            ValidationErrorCode::InvalidNonceFormat,
            "Nonce must contain only letters, numbers, hyphens, and underscores",
        ));
    }

    Ok(())
}

/// Run validators in order and return the first failure.
pub fn validate_batch<I>(validators: I) -> Validation
where
    I: IntoIterator<Item = Validation>,
{
    validators.into_iter().collect()
}
