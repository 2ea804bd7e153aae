//! HTTP implementation of [`Backend`] with bearer auth and one-shot refresh.
//!
//! Every request carries the current access credential. A 401 on an
//! authenticated request triggers exactly one `auth/refresh` followed by a
//! single replay. When there is no refresh credential or the refresh is
//! refused, the session is signed out (which broadcasts
//! [`SessionEvent::SignedOut`](crate::auth::SessionEvent)) and the call
//! fails with [`ApiError::SessionExpired`].

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use taskdeck_proto::project::{CreateProject, Project, ProjectId, UpdateProject};
use taskdeck_proto::task::{CreateTask, MoveTask, ReorderTasks, Task, TaskId, UpdateTask};
use taskdeck_proto::user::{
    AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, TokenPair, UpdateProfile, User,
};

use super::{ApiError, Backend};
use crate::auth::AuthSession;

/// HTTP client for the TaskDeck REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
    session: AuthSession,
    refresh_lock: std::sync::Arc<tokio::sync::Mutex<()>>,
}

/// One request, kept whole so it can be replayed after a refresh.
struct Call<'a> {
    method: Method,
    path: &'a str,
    query: Option<(&'static str, &'a str)>,
    body: Option<serde_json::Value>,
    authenticated: bool,
}

impl<'a> Call<'a> {
    const fn new(method: Method, path: &'a str) -> Self {
        Self {
            method,
            path,
            query: None,
            body: None,
            authenticated: true,
        }
    }

    fn json(mut self, body: &impl Serialize) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?);
        Ok(self)
    }

    fn query(mut self, name: &'static str, value: &'a str) -> Self {
        self.query = Some((name, value));
        self
    }

    fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

impl ApiClient {
    /// Creates a client for `api_url` (e.g. `http://localhost:3000/api/v1`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(api_url: &str, timeout: Duration, session: AuthSession) -> Result<Self, ApiError> {
        let mut base = Url::parse(api_url)
            .map_err(|e| ApiError::Network(format!("invalid API URL {api_url}: {e}")))?;
        // Relative joins replace the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base,
            session,
            refresh_lock: std::sync::Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Session this client authenticates with.
    #[must_use]
    pub const fn session(&self) -> &AuthSession {
        &self.session
    }

    /// `POST auth/login`; stores the session on success.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the server rejects the credentials.
    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        let call = Call::new(Method::POST, "auth/login").json(request)?.anonymous();
        let auth: AuthResponse = self.execute(call).await?;
        self.store_session(&auth);
        Ok(auth)
    }

    /// `POST auth/register`; stores the session on success.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the server rejects the registration.
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        let call = Call::new(Method::POST, "auth/register").json(request)?.anonymous();
        let auth: AuthResponse = self.execute(call).await?;
        self.store_session(&auth);
        Ok(auth)
    }

    /// `POST auth/logout`, then clears the local session whatever the
    /// server answered.
    ///
    /// # Errors
    ///
    /// Returns the server's [`ApiError`]; the local session is gone either way.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let result = self.execute_unit(Call::new(Method::POST, "auth/logout")).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "server logout failed, clearing local session anyway");
        }
        if let Err(e) = self.session.sign_out() {
            tracing::warn!(error = %e, "failed to remove session file");
        }
        result
    }

    fn store_session(&self, auth: &AuthResponse) {
        if let Err(e) = self.session.sign_in(auth.clone()) {
            tracing::warn!(error = %e, "failed to persist session");
        }
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|e| ApiError::Network(format!("invalid path {path}: {e}")))
    }

    async fn execute<T: DeserializeOwned>(&self, call: Call<'_>) -> Result<T, ApiError> {
        let response = self.dispatch(&call).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn execute_unit(&self, call: Call<'_>) -> Result<(), ApiError> {
        self.dispatch(&call).await.map(drop)
    }

    /// Sends `call`, refreshing and replaying once on 401.
    async fn dispatch(&self, call: &Call<'_>) -> Result<reqwest::Response, ApiError> {
        let token = call.authenticated.then(|| self.session.access_token()).flatten();
        let response = self.send_once(call, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED || !call.authenticated {
            return check(response).await;
        }

        tracing::debug!(path = call.path, "access token rejected, refreshing");
        let fresh = self.refresh(token.as_deref()).await?;
        let replay = self.send_once(call, Some(&fresh)).await?;
        check(replay).await
    }

    async fn send_once(
        &self,
        call: &Call<'_>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self.http.request(call.method.clone(), self.url(call.path)?);
        if let Some((name, value)) = call.query {
            request = request.query(&[(name, value)]);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.map_err(|e| {
            tracing::warn!(path = call.path, error = %e, "request failed");
            ApiError::Network(e.to_string())
        })
    }

    /// Exchanges the refresh credential for a new pair and returns the new
    /// access credential.
    ///
    /// Concurrent callers that hit 401 with the same stale credential share
    /// one refresh: whoever gets the lock second sees the credential already
    /// changed and reuses it.
    async fn refresh(&self, stale: Option<&str>) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.session.access_token() {
            if Some(current.as_str()) != stale {
                return Ok(current);
            }
        }

        let Some(refresh_token) = self.session.refresh_token() else {
            return Err(self.expire("no refresh credential"));
        };
        let call = Call::new(Method::POST, "auth/refresh")
            .json(&RefreshRequest { refresh_token })?
            .anonymous();
        let response = match self.send_once(&call, None).await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(status = response.status().as_u16(), "refresh refused");
                return Err(self.expire("refresh refused"));
            }
            Err(_) => return Err(self.expire("refresh request failed")),
        };
        let tokens: TokenPair = match response.json().await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "malformed refresh response");
                return Err(self.expire("malformed refresh response"));
            }
        };
        let access = tokens.access_token.clone();
        if let Err(e) = self.session.set_tokens(tokens) {
            tracing::warn!(error = %e, "failed to persist refreshed tokens");
        }
        tracing::info!("access token refreshed");
        Ok(access)
    }

    fn expire(&self, reason: &str) -> ApiError {
        tracing::warn!(reason, "session expired");
        if let Err(e) = self.session.sign_out() {
            tracing::warn!(error = %e, "failed to remove session file");
        }
        ApiError::SessionExpired
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let error = ApiError::from_status(status.as_u16(), &body);
    tracing::debug!(status = status.as_u16(), error = %error, "request rejected");
    Err(error)
}

impl Backend for ApiClient {
    async fn profile(&self) -> Result<User, ApiError> {
        self.execute(Call::new(Method::GET, "users/me")).await
    }

    async fn update_profile(&self, update: &UpdateProfile) -> Result<User, ApiError> {
        self.execute(Call::new(Method::PATCH, "users/me").json(update)?)
            .await
    }

    async fn users(&self) -> Result<Vec<User>, ApiError> {
        self.execute(Call::new(Method::GET, "users")).await
    }

    async fn projects(&self) -> Result<Vec<Project>, ApiError> {
        self.execute(Call::new(Method::GET, "projects")).await
    }

    async fn project(&self, id: &ProjectId) -> Result<Project, ApiError> {
        let path = format!("projects/{id}");
        self.execute(Call::new(Method::GET, &path)).await
    }

    async fn create_project(&self, project: &CreateProject) -> Result<Project, ApiError> {
        self.execute(Call::new(Method::POST, "projects").json(project)?)
            .await
    }

    async fn update_project(
        &self,
        id: &ProjectId,
        update: &UpdateProject,
    ) -> Result<Project, ApiError> {
        let path = format!("projects/{id}");
        self.execute(Call::new(Method::PATCH, &path).json(update)?)
            .await
    }

    async fn delete_project(&self, id: &ProjectId) -> Result<(), ApiError> {
        let path = format!("projects/{id}");
        self.execute_unit(Call::new(Method::DELETE, &path)).await
    }

    async fn tasks(&self, project: Option<&ProjectId>) -> Result<Vec<Task>, ApiError> {
        let call = Call::new(Method::GET, "tasks");
        let call = match project {
            Some(project) => call.query("projectId", project.as_str()),
            None => call,
        };
        self.execute(call).await
    }

    async fn task(&self, id: &TaskId) -> Result<Task, ApiError> {
        let path = format!("tasks/{id}");
        self.execute(Call::new(Method::GET, &path)).await
    }

    async fn create_task(&self, task: &CreateTask) -> Result<Task, ApiError> {
        self.execute(Call::new(Method::POST, "tasks").json(task)?).await
    }

    async fn update_task(&self, id: &TaskId, update: &UpdateTask) -> Result<Task, ApiError> {
        let path = format!("tasks/{id}");
        self.execute(Call::new(Method::PATCH, &path).json(update)?)
            .await
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), ApiError> {
        let path = format!("tasks/{id}");
        self.execute_unit(Call::new(Method::DELETE, &path)).await
    }

    async fn move_task(&self, id: &TaskId, to: &MoveTask) -> Result<Task, ApiError> {
        let path = format!("tasks/{id}/move");
        self.execute(Call::new(Method::PATCH, &path).json(to)?).await
    }

    async fn reorder_tasks(&self, reorder: &ReorderTasks) -> Result<(), ApiError> {
        self.execute_unit(Call::new(Method::PATCH, "tasks/reorder").json(reorder)?)
            .await
    }
}
