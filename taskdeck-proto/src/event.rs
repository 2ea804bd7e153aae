//! Push-channel wire protocol.
//!
//! Every WebSocket text frame carries one JSON object of the form
//! `{"event": "<name>", "data": <payload>}`. The server pushes lifecycle
//! events ([`PushEvent`]); the client sends room membership changes
//! ([`ClientEvent`]).

use serde::{Deserialize, Serialize};

use crate::notification::Notification;
use crate::project::{Project, ProjectId};
use crate::task::{Task, TaskId};

/// `task:created`.
pub const TASK_CREATED: &str = "task:created";
/// `task:updated`.
pub const TASK_UPDATED: &str = "task:updated";
/// `task:moved`.
pub const TASK_MOVED: &str = "task:moved";
/// `task:deleted`.
pub const TASK_DELETED: &str = "task:deleted";
/// `tasks:reordered`.
pub const TASKS_REORDERED: &str = "tasks:reordered";
/// `project:created`.
pub const PROJECT_CREATED: &str = "project:created";
/// `project:updated`.
pub const PROJECT_UPDATED: &str = "project:updated";
/// `notification`.
pub const NOTIFICATION: &str = "notification";
/// `join-project`.
pub const JOIN_PROJECT: &str = "join-project";
/// `leave-project`.
pub const LEAVE_PROJECT: &str = "leave-project";

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not a `{"event", "data"}` JSON object.
    #[error("malformed frame: {0}")]
    Frame(#[source] serde_json::Error),

    /// The frame names a known event but its payload has the wrong shape.
    #[error("invalid payload for {event}: {source}")]
    Payload {
        /// Event name from the frame.
        event: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Raw frame envelope.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Payload of `task:deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedTask {
    /// The deleted task.
    pub id: TaskId,
    /// Project it belonged to.
    pub project_id: ProjectId,
}

/// Optional payload of `tasks:reordered`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderScope {
    /// Project whose tasks were reordered, when the server says so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

/// An event pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Another client created a task.
    TaskCreated(Task),
    /// Another client edited a task.
    TaskUpdated(Task),
    /// Another client moved a task to a new column or position.
    TaskMoved(Task),
    /// Another client deleted a task.
    TaskDeleted(DeletedTask),
    /// A bulk reorder happened.
    TasksReordered(ReorderScope),
    /// A project was created.
    ProjectCreated(Project),
    /// A project was edited.
    ProjectUpdated(Project),
    /// A notification for the signed-in user.
    Notification(Notification),
    /// An event this client does not handle.
    Unknown {
        /// The event name as received.
        name: String,
    },
}

impl PushEvent {
    /// Wire name of this event.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::TaskCreated(_) => TASK_CREATED,
            Self::TaskUpdated(_) => TASK_UPDATED,
            Self::TaskMoved(_) => TASK_MOVED,
            Self::TaskDeleted(_) => TASK_DELETED,
            Self::TasksReordered(_) => TASKS_REORDERED,
            Self::ProjectCreated(_) => PROJECT_CREATED,
            Self::ProjectUpdated(_) => PROJECT_UPDATED,
            Self::Notification(_) => NOTIFICATION,
            Self::Unknown { name } => name,
        }
    }
}

/// An event sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Subscribe to a project's room.
    JoinProject(ProjectId),
    /// Unsubscribe from a project's room.
    LeaveProject(ProjectId),
}

impl ClientEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinProject(_) => JOIN_PROJECT,
            Self::LeaveProject(_) => LEAVE_PROJECT,
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    event: &str,
    data: serde_json::Value,
) -> Result<T, CodecError> {
    serde_json::from_value(data).map_err(|source| CodecError::Payload {
        event: event.to_string(),
        source,
    })
}

/// Decodes a server frame.
///
/// Unknown event names decode to [`PushEvent::Unknown`] rather than an error.
///
/// # Errors
///
/// Returns [`CodecError`] when the frame or a known event's payload is malformed.
pub fn decode(text: &str) -> Result<PushEvent, CodecError> {
    let frame: Frame = serde_json::from_str(text).map_err(CodecError::Frame)?;
    let Frame { event, data } = frame;
    let decoded = match event.as_str() {
        TASK_CREATED => PushEvent::TaskCreated(payload(&event, data)?),
        TASK_UPDATED => PushEvent::TaskUpdated(payload(&event, data)?),
        TASK_MOVED => PushEvent::TaskMoved(payload(&event, data)?),
        TASK_DELETED => PushEvent::TaskDeleted(payload(&event, data)?),
        TASKS_REORDERED => {
            if data.is_null() {
                PushEvent::TasksReordered(ReorderScope::default())
            } else {
                PushEvent::TasksReordered(payload(&event, data)?)
            }
        }
        PROJECT_CREATED => PushEvent::ProjectCreated(payload(&event, data)?),
        PROJECT_UPDATED => PushEvent::ProjectUpdated(payload(&event, data)?),
        NOTIFICATION => PushEvent::Notification(payload(&event, data)?),
        _ => PushEvent::Unknown { name: event },
    };
    Ok(decoded)
}

/// Encodes a server event. Used by servers and test fixtures.
///
/// # Errors
///
/// Returns [`CodecError::Frame`] if the payload cannot be serialized.
pub fn encode(event: &PushEvent) -> Result<String, CodecError> {
    let data = match event {
        PushEvent::TaskCreated(task) | PushEvent::TaskUpdated(task) | PushEvent::TaskMoved(task) => {
            serde_json::to_value(task)
        }
        PushEvent::TaskDeleted(deleted) => serde_json::to_value(deleted),
        PushEvent::TasksReordered(scope) => serde_json::to_value(scope),
        PushEvent::ProjectCreated(project) | PushEvent::ProjectUpdated(project) => {
            serde_json::to_value(project)
        }
        PushEvent::Notification(notification) => serde_json::to_value(notification),
        PushEvent::Unknown { .. } => Ok(serde_json::Value::Null),
    }
    .map_err(CodecError::Frame)?;
    write_frame(event.name(), data)
}

/// Encodes a client event.
///
/// # Errors
///
/// Returns [`CodecError::Frame`] if serialization fails.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    let (ClientEvent::JoinProject(project) | ClientEvent::LeaveProject(project)) = event;
    write_frame(
        event.name(),
        serde_json::Value::String(project.as_str().to_string()),
    )
}

/// Decodes a client frame. Used by servers and test fixtures.
///
/// Returns `Ok(None)` for event names that are not client events.
///
/// # Errors
///
/// Returns [`CodecError`] when the frame is malformed.
pub fn decode_client(text: &str) -> Result<Option<ClientEvent>, CodecError> {
    let Frame { event, data } = serde_json::from_str(text).map_err(CodecError::Frame)?;
    let project = || payload::<ProjectId>(&event, data.clone());
    match event.as_str() {
        JOIN_PROJECT => Ok(Some(ClientEvent::JoinProject(project()?))),
        LEAVE_PROJECT => Ok(Some(ClientEvent::LeaveProject(project()?))),
        _ => Ok(None),
    }
}

fn write_frame(event: &str, data: serde_json::Value) -> Result<String, CodecError> {
    serde_json::to_string(&Frame {
        event: event.to_string(),
        data,
    })
    .map_err(CodecError::Frame)
}
