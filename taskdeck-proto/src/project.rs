//! Project model and project request payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserId;
use crate::validate::{self, ValidationError};

/// Maximum project name length in characters.
pub const MAX_PROJECT_NAME_LENGTH: usize = 100;

/// Maximum project description length in characters.
pub const MAX_PROJECT_DESCRIPTION_LENGTH: usize = 500;

/// Server-assigned project identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
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

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregate counters the server attaches to a project (`_count`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCounts {
    /// Number of tasks in the project.
    #[serde(default)]
    pub tasks: u64,
}

/// A project as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Server-assigned identifier.
    pub id: ProjectId,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional `#RRGGBB` accent color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Owner of the project.
    pub owner_id: UserId,
    /// Whether the project is active.
    #[serde(default = "active_default")]
    pub is_active: bool,
    /// Server-computed aggregates.
    #[serde(rename = "_count", default)]
    pub counts: ProjectCounts,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

const fn active_default() -> bool {
    true
}

impl Project {
    /// Number of tasks the server last reported for this project.
    #[must_use]
    pub const fn task_count(&self) -> u64 {
        self.counts.tasks
    }

    /// Applies the fields present in `update` to this project.
    pub fn apply(&mut self, update: &UpdateProject) {
        if let Some(name) = &update.name {
            self.name.clone_from(name);
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }
        if let Some(color) = &update.color {
            self.color = Some(color.clone());
        }
    }
}

/// Payload of `POST projects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProject {
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional `#RRGGBB` color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl CreateProject {
    /// Validates the payload before it is sent.
    ///
    /// # Errors
    ///
    /// Returns the first failing field's [`ValidationError`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(Some(&self.name), self.description.as_deref(), self.color.as_deref())
    }
}

/// Payload of `PATCH projects/{id}`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProject {
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl UpdateProject {
    /// Validates the fields that are present.
    ///
    /// # Errors
    ///
    /// Returns the first failing field's [`ValidationError`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(
            self.name.as_deref(),
            self.description.as_deref(),
            self.color.as_deref(),
        )
    }
}

fn validate_fields(
    name: Option<&str>,
    description: Option<&str>,
    color: Option<&str>,
) -> Result<(), ValidationError> {
    if let Some(name) = name {
        validate::required("name", name)?;
        validate::char_len("name", name, 1, MAX_PROJECT_NAME_LENGTH)?;
    }
    if let Some(description) = description {
        validate::char_len("description", description, 0, MAX_PROJECT_DESCRIPTION_LENGTH)?;
    }
    if let Some(color) = color {
        validate::hex_color(color)?;
    }
    Ok(())
}
