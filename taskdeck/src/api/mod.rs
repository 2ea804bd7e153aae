//! REST backend access.
//!
//! [`Backend`] is the seam the query layer and the mutation coordinator
//! talk through; [`ApiClient`] implements it over HTTP. Tests substitute
//! in-memory backends.

pub mod client;

pub use client::ApiClient;

use std::future::Future;

use taskdeck_proto::project::{CreateProject, Project, ProjectId, UpdateProject};
use taskdeck_proto::task::{CreateTask, MoveTask, ReorderTasks, Task, TaskId, UpdateTask};
use taskdeck_proto::user::{UpdateProfile, User};

/// Message shown when the server gave no usable explanation.
pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Errors returned by backend calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The server rejected the credential.
    #[error("not authenticated")]
    Unauthorized,

    /// The requested resource does not exist.
    #[error("not found")]
    NotFound,

    /// The server refused the request.
    #[error("request rejected with status {status}: {}", message.as_deref().unwrap_or(GENERIC_ERROR_MESSAGE))]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Server-provided explanation.
        message: Option<String>,
    },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    Decode(String),

    /// Refreshing the credential failed; the session has been cleared.
    #[error("session expired, please sign in again")]
    SessionExpired,
}

impl ApiError {
    /// Explanation supplied by the server, if any.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Rejected {
                message: Some(message),
                ..
            } => Some(message),
            _ => None,
        }
    }

    /// Text to put in front of the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        self.server_message()
            .unwrap_or(GENERIC_ERROR_MESSAGE)
            .to_string()
    }

    /// Builds the error for a non-success response.
    ///
    /// `body` is inspected for a `message` field holding either a string or
    /// an array of strings (validation errors); the first entry wins.
    #[must_use]
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => Self::Unauthorized,
            404 => Self::NotFound,
            _ => Self::Rejected {
                status,
                message: extract_message(body),
            },
        }
    }
}

fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let message = match value.get("message")? {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items.first()?.as_str()?.to_string(),
        _ => return None,
    };
    (!message.trim().is_empty()).then_some(message)
}

/// Resource operations against the TaskDeck server.
pub trait Backend: Send + Sync {
    /// `GET users/me`.
    fn profile(&self) -> impl Future<Output = Result<User, ApiError>> + Send;

    /// `PATCH users/me`.
    fn update_profile(
        &self,
        update: &UpdateProfile,
    ) -> impl Future<Output = Result<User, ApiError>> + Send;

    /// `GET users`.
    fn users(&self) -> impl Future<Output = Result<Vec<User>, ApiError>> + Send;

    /// `GET projects`.
    fn projects(&self) -> impl Future<Output = Result<Vec<Project>, ApiError>> + Send;

    /// `GET projects/{id}`.
    fn project(&self, id: &ProjectId) -> impl Future<Output = Result<Project, ApiError>> + Send;

    /// `POST projects`.
    fn create_project(
        &self,
        project: &CreateProject,
    ) -> impl Future<Output = Result<Project, ApiError>> + Send;

    /// `PATCH projects/{id}`.
    fn update_project(
        &self,
        id: &ProjectId,
        update: &UpdateProject,
    ) -> impl Future<Output = Result<Project, ApiError>> + Send;

    /// `DELETE projects/{id}`.
    fn delete_project(&self, id: &ProjectId) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// `GET tasks`, optionally `?projectId=`.
    fn tasks(
        &self,
        project: Option<&ProjectId>,
    ) -> impl Future<Output = Result<Vec<Task>, ApiError>> + Send;

    /// `GET tasks/{id}`.
    fn task(&self, id: &TaskId) -> impl Future<Output = Result<Task, ApiError>> + Send;

    /// `POST tasks`.
    fn create_task(&self, task: &CreateTask) -> impl Future<Output = Result<Task, ApiError>> + Send;

    /// `PATCH tasks/{id}`.
    fn update_task(
        &self,
        id: &TaskId,
        update: &UpdateTask,
    ) -> impl Future<Output = Result<Task, ApiError>> + Send;

    /// `DELETE tasks/{id}`.
    fn delete_task(&self, id: &TaskId) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// `PATCH tasks/{id}/move`.
    fn move_task(
        &self,
        id: &TaskId,
        to: &MoveTask,
    ) -> impl Future<Output = Result<Task, ApiError>> + Send;

    /// `PATCH tasks/reorder`.
    fn reorder_tasks(
        &self,
        reorder: &ReorderTasks,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}
