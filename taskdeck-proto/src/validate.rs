//! Inline form validation shared by every request DTO.
//!
//! Validation runs before any network call. A [`ValidationError`] names the
//! offending field so the caller can render it next to that field; it never
//! reaches the cache layer.

/// A request field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A mandatory field is empty.
    #[error("{field} is required")]
    Required {
        /// Name of the offending field.
        field: &'static str,
    },
    /// A field is shorter than the minimum length (in characters).
    #[error("{field} must be at least {min} characters")]
    TooShort {
        /// Name of the offending field.
        field: &'static str,
        /// Minimum number of characters.
        min: usize,
    },
    /// A field is longer than the maximum length (in characters).
    #[error("{field} must be at most {max} characters")]
    TooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Maximum number of characters.
        max: usize,
    },
    /// The email address is not of the form `local@domain.tld`.
    #[error("invalid email address")]
    InvalidEmail,
    /// The color is not a `#RRGGBB` hex triplet.
    #[error("invalid color format")]
    InvalidColor,
}

impl ValidationError {
    /// Returns the name of the field this error refers to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::Required { field } | Self::TooShort { field, .. } | Self::TooLong { field, .. } => {
                field
            }
            Self::InvalidEmail => "email",
            Self::InvalidColor => "color",
        }
    }
}

/// Rejects an empty (or whitespace-only) value.
///
/// # Errors
///
/// Returns [`ValidationError::Required`] when `value` is blank.
pub fn required(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required { field });
    }
    Ok(())
}

/// Checks the character count of `value` against `min..=max`.
///
/// # Errors
///
/// Returns [`ValidationError::TooShort`] or [`ValidationError::TooLong`].
pub fn char_len(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min {
        return Err(ValidationError::TooShort { field, min });
    }
    if len > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// Checks that `value` looks like an email address.
///
/// Only the shape is checked: one `@`, a non-empty local part, and a domain
/// containing a dot that neither starts nor ends the domain.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidEmail`].
pub fn email(value: &str) -> Result<(), ValidationError> {
    let Some((local, domain)) = value.split_once('@') else {
        return Err(ValidationError::InvalidEmail);
    };
    let valid = !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

/// Checks that `value` is a `#RRGGBB` color (case-insensitive).
///
/// # Errors
///
/// Returns [`ValidationError::InvalidColor`].
pub fn hex_color(value: &str) -> Result<(), ValidationError> {
    let Some(hex) = value.strip_prefix('#') else {
        return Err(ValidationError::InvalidColor);
    };
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidColor)
    }
}
