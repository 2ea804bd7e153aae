//! Maps push events to cache invalidations.
//!
//! The invalidator only calls [`QueryCache::invalidate`],
//! [`QueryCache::invalidate_prefix`] and [`NotificationStore::add`]; it never
//! writes cache values. Refetching is left to whoever reads next (or to the
//! revalidator), so duplicate or echoed events converge on the same state.

use std::sync::Arc;

use parking_lot::Mutex;

use taskdeck_proto::event::PushEvent;

use crate::cache::{CacheKey, QueryCache};
use crate::notifications::NotificationStore;

use super::{PushChannel, PushError};

/// One invalidation produced by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Exactly this key.
    Key(CacheKey),
    /// Every key under this prefix.
    Family(CacheKey),
}

/// The invalidations `event` implies.
#[must_use]
pub fn keys_for(event: &PushEvent) -> Vec<Invalidation> {
    use Invalidation::{Family, Key};
    match event {
        PushEvent::TaskCreated(task) => vec![
            Key(CacheKey::tasks()),
            Key(CacheKey::project_tasks(&task.project_id)),
            Key(CacheKey::project(&task.project_id)),
        ],
        PushEvent::TaskUpdated(task) => vec![
            Key(CacheKey::tasks()),
            Key(CacheKey::project_tasks(&task.project_id)),
            Key(CacheKey::task(&task.id)),
        ],
        PushEvent::TaskMoved(task) => vec![
            Key(CacheKey::tasks()),
            Key(CacheKey::project_tasks(&task.project_id)),
        ],
        PushEvent::TaskDeleted(deleted) => vec![
            Key(CacheKey::tasks()),
            Key(CacheKey::project_tasks(&deleted.project_id)),
        ],
        PushEvent::TasksReordered(scope) => match &scope.project_id {
            Some(project) => vec![
                Key(CacheKey::tasks()),
                Key(CacheKey::project_tasks(project)),
            ],
            None => vec![Family(CacheKey::tasks())],
        },
        PushEvent::ProjectCreated(project) | PushEvent::ProjectUpdated(project) => vec![
            Key(CacheKey::projects()),
            Key(CacheKey::project(&project.id)),
        ],
        PushEvent::Notification(_) | PushEvent::Unknown { .. } => Vec::new(),
    }
}

/// Applies push events to the cache and the notification store.
#[derive(Clone)]
pub struct PushInvalidator {
    cache: QueryCache,
    notifications: Arc<Mutex<NotificationStore>>,
}

impl PushInvalidator {
    /// Creates an invalidator over the shared cache and inbox.
    #[must_use]
    pub const fn new(cache: QueryCache, notifications: Arc<Mutex<NotificationStore>>) -> Self {
        Self {
            cache,
            notifications,
        }
    }

    /// Handles one event. Returns the invalidations it applied.
    pub fn handle(&self, event: PushEvent) -> Vec<Invalidation> {
        if let PushEvent::Notification(notification) = event {
            let id = self.notifications.lock().add(notification);
            tracing::info!(id = %id, "notification received");
            return Vec::new();
        }

        let invalidations = keys_for(&event);
        for invalidation in &invalidations {
            match invalidation {
                Invalidation::Key(key) => {
                    self.cache.invalidate(key);
                }
                Invalidation::Family(prefix) => {
                    self.cache.invalidate_prefix(prefix);
                }
            }
        }
        tracing::debug!(
            event = event.name(),
            count = invalidations.len(),
            "push event invalidated cache"
        );
        invalidations
    }

    /// Consumes events from `channel` until it closes.
    ///
    /// `on_event` observes each event after it was applied.
    pub async fn run<F>(&self, channel: &PushChannel, mut on_event: F) -> PushError
    where
        F: FnMut(&PushEvent, &[Invalidation]),
    {
        loop {
            match channel.next_event().await {
                Ok(event) => {
                    let observed = event.clone();
                    let applied = self.handle(event);
                    on_event(&observed, &applied);
                }
                Err(e) => return e,
            }
        }
    }
}
