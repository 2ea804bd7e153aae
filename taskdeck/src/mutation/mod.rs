//! Optimistic mutations over the shared query cache.
//!
//! Every mutation runs the same sequence:
//!
//! 1. validate the payload (failures return before anything else happens);
//! 2. hold every touched key family, so fetches that finish before the
//!    request settles are discarded, and cancel the ones in flight;
//! 3. snapshot those families;
//! 4. write the optimistic result into the cache;
//! 5. send exactly one request;
//! 6. on success replace the optimistic values with the server's record,
//!    on failure restore the snapshot and emit exactly one error toast;
//! 7. invalidate the broader resource family either way, which the
//!    [`Revalidator`](crate::cache::Revalidator) picks up in the background.

mod projects;
mod tasks;
pub mod toast;

pub use toast::{Toast, ToastLevel};

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use taskdeck_proto::validate::ValidationError;

use crate::api::{ApiError, Backend};
use crate::cache::{CacheKey, QueryCache};

/// Id prefix of records created locally and not yet confirmed.
pub const OPTIMISTIC_ID_PREFIX: &str = "optimistic-";

/// Errors returned by mutations.
///
/// By the time [`MutationError::Failed`] or [`MutationError::SessionExpired`]
/// is returned the cache has already been rolled back and the error toast
/// has already been sent.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    /// The payload was rejected locally; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The request failed.
    #[error("{message}")]
    Failed {
        /// Message shown to the user.
        message: String,
        /// What the backend returned.
        #[source]
        source: ApiError,
    },

    /// The session could not be refreshed and has been signed out.
    #[error("session expired, please sign in again")]
    SessionExpired,
}

/// How one mutation touches the cache and what the user is told.
struct Plan {
    action: &'static str,
    /// Families canceled and snapshotted before the optimistic write.
    touched: Vec<CacheKey>,
    /// Families invalidated once the request settles.
    revalidate: Vec<CacheKey>,
    success: Option<&'static str>,
    fallback: &'static str,
}

/// Applies optimistic mutations and reconciles them with the backend.
pub struct MutationCoordinator<B> {
    backend: Arc<B>,
    cache: QueryCache,
    toasts: mpsc::UnboundedSender<Toast>,
}

impl<B> Clone for MutationCoordinator<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            cache: self.cache.clone(),
            toasts: self.toasts.clone(),
        }
    }
}

impl<B: Backend> MutationCoordinator<B> {
    /// Creates a coordinator writing into `cache` and reporting to `toasts`.
    pub const fn new(
        backend: Arc<B>,
        cache: QueryCache,
        toasts: mpsc::UnboundedSender<Toast>,
    ) -> Self {
        Self {
            backend,
            cache,
            toasts,
        }
    }

    /// The cache mutations are applied to.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    async fn run<T, Fut>(
        &self,
        plan: Plan,
        apply: impl FnOnce(&QueryCache),
        request: Fut,
        reconcile: impl FnOnce(&QueryCache, &T),
    ) -> Result<T, MutationError>
    where
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let hold = self.cache.hold(&plan.touched);
        for family in &plan.touched {
            self.cache.cancel(family);
        }
        let snapshot = self.cache.snapshot(&plan.touched);
        apply(&self.cache);
        tracing::debug!(action = plan.action, "optimistic update applied");

        let outcome = match request.await {
            Ok(value) => {
                reconcile(&self.cache, &value);
                tracing::info!(action = plan.action, "mutation committed");
                if let Some(message) = plan.success {
                    self.toast(Toast::success(message));
                }
                Ok(value)
            }
            Err(error) => {
                self.cache.restore(snapshot);
                let message = error.server_message().unwrap_or(plan.fallback).to_string();
                tracing::warn!(action = plan.action, error = %error, "mutation failed, rolled back");
                self.toast(Toast::error(message.clone()));
                Err(match error {
                    ApiError::SessionExpired => MutationError::SessionExpired,
                    source => MutationError::Failed { message, source },
                })
            }
        };

        drop(hold);
        for family in &plan.revalidate {
            self.cache.invalidate_prefix(family);
        }
        outcome
    }

    fn toast(&self, toast: Toast) {
        if self.toasts.send(toast).is_err() {
            tracing::trace!("toast receiver dropped");
        }
    }
}

fn optimistic_id() -> String {
    format!("{OPTIMISTIC_ID_PREFIX}{}", uuid::Uuid::now_v7())
}
