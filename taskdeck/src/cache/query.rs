//! Read-through access to the cache and background revalidation.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use taskdeck_proto::project::{Project, ProjectId};
use taskdeck_proto::task::{Task, TaskId};
use taskdeck_proto::user::User;

use super::key::CacheKey;
use super::store::{CachedValue, Freshness, QueryCache};
use crate::api::{ApiError, Backend};

/// Reads server state through the cache.
///
/// A fresh entry is served as-is; anything else is fetched, guarded by a
/// fetch ticket so that a slow response never overwrites a newer local
/// write.
pub struct QueryClient<B> {
    backend: Arc<B>,
    cache: QueryCache,
}

impl<B> Clone for QueryClient<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            cache: self.cache.clone(),
        }
    }
}

impl<B: Backend> QueryClient<B> {
    /// Creates a client over `backend` writing into `cache`.
    pub const fn new(backend: Arc<B>, cache: QueryCache) -> Self {
        Self { backend, cache }
    }

    /// The underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Tasks of `project`, or every task when `None`.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`ApiError`] when a fetch was needed and failed.
    pub async fn tasks(&self, project: Option<&ProjectId>) -> Result<Vec<Task>, ApiError> {
        let key = project.map_or_else(CacheKey::tasks, CacheKey::project_tasks);
        match self.read(&key).await? {
            CachedValue::Tasks(tasks) => Ok(tasks),
            other => Err(mismatch(&key, &other)),
        }
    }

    /// One task.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`ApiError`] when a fetch was needed and failed.
    pub async fn task(&self, id: &TaskId) -> Result<Task, ApiError> {
        let key = CacheKey::task(id);
        match self.read(&key).await? {
            CachedValue::Task(task) => Ok(task),
            other => Err(mismatch(&key, &other)),
        }
    }

    /// Every project.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`ApiError`] when a fetch was needed and failed.
    pub async fn projects(&self) -> Result<Vec<Project>, ApiError> {
        let key = CacheKey::projects();
        match self.read(&key).await? {
            CachedValue::Projects(projects) => Ok(projects),
            other => Err(mismatch(&key, &other)),
        }
    }

    /// One project.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`ApiError`] when a fetch was needed and failed.
    pub async fn project(&self, id: &ProjectId) -> Result<Project, ApiError> {
        let key = CacheKey::project(id);
        match self.read(&key).await? {
            CachedValue::Project(project) => Ok(project),
            other => Err(mismatch(&key, &other)),
        }
    }

    /// The user directory.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`ApiError`] when a fetch was needed and failed.
    pub async fn users(&self) -> Result<Vec<User>, ApiError> {
        let key = CacheKey::users();
        match self.read(&key).await? {
            CachedValue::Users(users) => Ok(users),
            other => Err(mismatch(&key, &other)),
        }
    }

    /// The signed-in user.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`ApiError`] when a fetch was needed and failed.
    pub async fn profile(&self) -> Result<User, ApiError> {
        let key = CacheKey::profile();
        match self.read(&key).await? {
            CachedValue::Profile(user) => Ok(user),
            other => Err(mismatch(&key, &other)),
        }
    }

    async fn read(&self, key: &CacheKey) -> Result<CachedValue, ApiError> {
        if self.cache.freshness(key) == Freshness::Fresh {
            if let Some(value) = self.cache.get(key) {
                tracing::trace!(key = %key, "cache hit");
                return Ok(value);
            }
        }
        self.fetch(key).await
    }

    /// Fetches `key` from the backend regardless of freshness.
    ///
    /// When a newer local write supersedes the fetch, the cache's current
    /// value is returned instead of the response.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`ApiError`].
    pub async fn fetch(&self, key: &CacheKey) -> Result<CachedValue, ApiError> {
        let ticket = self.cache.begin_fetch(key);
        match self.load(key).await {
            Ok(value) => {
                if self.cache.complete_fetch(&ticket, Ok(value.clone())) {
                    Ok(value)
                } else {
                    Ok(self.cache.get(key).unwrap_or(value))
                }
            }
            Err(e) => {
                self.cache.complete_fetch(&ticket, Err(e.to_string()));
                Err(e)
            }
        }
    }

    /// Refetches every known key under `prefix` that is not fresh and has
    /// no first fetch in flight. Returns how many keys were refetched.
    pub async fn revalidate(&self, prefix: &CacheKey) -> usize {
        let mut refetched = 0;
        for key in self.cache.keys_under(prefix) {
            match self.cache.freshness(&key) {
                Freshness::Fresh | Freshness::Loading => continue,
                Freshness::Absent | Freshness::Stale | Freshness::Error => {}
            }
            refetched += 1;
            if let Err(e) = self.fetch(&key).await {
                tracing::warn!(key = %key, error = %e, "revalidation failed");
            }
        }
        if refetched > 0 {
            tracing::debug!(prefix = %prefix, refetched, "revalidated");
        }
        refetched
    }

    async fn load(&self, key: &CacheKey) -> Result<CachedValue, ApiError> {
        let segments: Vec<&str> = key.segments().iter().map(String::as_str).collect();
        match segments.as_slice() {
            ["tasks"] => self.backend.tasks(None).await.map(CachedValue::Tasks),
            ["tasks", "project", project] => self
                .backend
                .tasks(Some(&ProjectId::new(*project)))
                .await
                .map(CachedValue::Tasks),
            ["tasks", "id", id] => self
                .backend
                .task(&TaskId::new(*id))
                .await
                .map(CachedValue::Task),
            ["projects"] => self.backend.projects().await.map(CachedValue::Projects),
            ["projects", id] => self
                .backend
                .project(&ProjectId::new(*id))
                .await
                .map(CachedValue::Project),
            ["users"] => self.backend.users().await.map(CachedValue::Users),
            ["profile"] => self.backend.profile().await.map(CachedValue::Profile),
            _ => {
                tracing::warn!(key = %key, "no loader for cache key");
                Err(ApiError::NotFound)
            }
        }
    }
}

fn mismatch(key: &CacheKey, value: &CachedValue) -> ApiError {
    tracing::error!(key = %key, ?value, "cache holds a value of the wrong kind");
    ApiError::Decode(format!("unexpected cached value for {key}"))
}

/// Background task that refetches invalidated keys.
///
/// Listens on the cache's invalidation broadcast and calls
/// [`QueryClient::revalidate`] for each announced key or family, so that
/// mutations and push events never wait on the refetch themselves.
#[derive(Debug)]
pub struct Revalidator {
    handle: JoinHandle<()>,
}

impl Revalidator {
    /// Spawns the task on the current runtime.
    pub fn spawn<B: Backend + 'static>(client: QueryClient<B>) -> Self {
        let mut rx = client.cache().subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(prefix) => {
                        client.revalidate(&prefix).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "revalidator lagged, revalidating everything");
                        client.revalidate(&CacheKey::root()).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("revalidator exiting");
        });
        Self { handle }
    }

    /// Stops the task.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}
