//! Notification payloads delivered over the push channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserId;

/// Lifecycle event a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// A task was created.
    TaskCreated,
    /// A task was edited.
    TaskUpdated,
    /// A task was assigned to the recipient.
    TaskAssigned,
    /// A task was marked complete.
    TaskCompleted,
    /// A project was created.
    ProjectCreated,
    /// A project was edited.
    ProjectUpdated,
    /// A kind this client does not know yet.
    #[serde(other)]
    Other,
}

/// A user-facing notification.
///
/// The server sends `type`, `title`, `message`, `userId` and optionally
/// `data` / `createdAt`. `id` and `read` are client-side bookkeeping and are
/// filled in when the notification enters the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Client-side identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// What happened.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Short heading.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Event-specific payload (usually the affected entity).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// When the event happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Whether the user has seen it.
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    /// Returns `data.id` when the payload carries a string or numeric id.
    #[must_use]
    pub fn data_id(&self) -> Option<String> {
        match self.data.as_ref()?.get("id")? {
            serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
