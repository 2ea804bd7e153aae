//! User, authentication and profile payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validate::{self, ValidationError};

/// Minimum password length accepted by the sign-in and sign-up forms.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Minimum length of first and last names.
pub const MIN_NAME_LENGTH: usize = 2;

const MAX_NAME_LENGTH: usize = 100;
const MAX_PASSWORD_LENGTH: usize = 128;

/// Server-assigned user identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a server-provided identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    /// Administrator.
    Admin,
    /// Regular account.
    #[default]
    User,
}

/// A user profile as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Server-assigned identifier.
    pub id: UserId,
    /// Sign-in email.
    pub email: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Account role.
    #[serde(default)]
    pub role: UserRole,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Whether the account is enabled.
    #[serde(default)]
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// `First Last`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Whether `handle` names this user, by id or by email (case-insensitive).
    #[must_use]
    pub fn answers_to(&self, handle: &str) -> bool {
        let handle = handle.trim();
        self.id.as_str() == handle || self.email.eq_ignore_ascii_case(handle)
    }
}

/// Access and refresh credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Short-lived bearer credential.
    pub access_token: String,
    /// Long-lived credential exchanged for a new pair on expiry.
    pub refresh_token: String,
}

/// Response of `auth/login` and `auth/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// The signed-in user.
    pub user: User,
    /// Short-lived bearer credential.
    pub access_token: String,
    /// Long-lived refresh credential.
    pub refresh_token: String,
}

impl AuthResponse {
    /// Splits out the credential pair.
    #[must_use]
    pub fn tokens(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Body of `auth/refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    /// The stored refresh credential.
    pub refresh_token: String,
}

/// Body of `auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Sign-in email.
    pub email: String,
    /// Plain-text password (sent over TLS only).
    pub password: String,
}

impl LoginRequest {
    /// Validates the form before it is submitted.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidEmail`] or a password length error.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::email(&self.email)?;
        validate::char_len("password", &self.password, MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH)
    }
}

/// Body of `auth/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Sign-in email.
    pub email: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Plain-text password.
    pub password: String,
}

impl RegisterRequest {
    /// Validates the form before it is submitted.
    ///
    /// # Errors
    ///
    /// Returns the first failing field's [`ValidationError`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::email(&self.email)?;
        validate::char_len("firstName", &self.first_name, MIN_NAME_LENGTH, MAX_NAME_LENGTH)?;
        validate::char_len("lastName", &self.last_name, MIN_NAME_LENGTH, MAX_NAME_LENGTH)?;
        validate::char_len("password", &self.password, MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH)
    }
}

/// Body of `PATCH users/me`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfile {
    /// New given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// New family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// New email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// New avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UpdateProfile {
    /// Validates the fields that are present.
    ///
    /// # Errors
    ///
    /// Returns the first failing field's [`ValidationError`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(first) = &self.first_name {
            validate::char_len("firstName", first, MIN_NAME_LENGTH, MAX_NAME_LENGTH)?;
        }
        if let Some(last) = &self.last_name {
            validate::char_len("lastName", last, MIN_NAME_LENGTH, MAX_NAME_LENGTH)?;
        }
        if let Some(email) = &self.email {
            validate::email(email)?;
        }
        Ok(())
    }

    /// Applies the fields present in this update to `user`.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(first) = &self.first_name {
            user.first_name.clone_from(first);
        }
        if let Some(last) = &self.last_name {
            user.last_name.clone_from(last);
        }
        if let Some(email) = &self.email {
            user.email.clone_from(email);
        }
        if let Some(avatar) = &self.avatar {
            user.avatar = Some(avatar.clone());
        }
    }
}
