//! Bounded, persisted notification inbox.
//!
//! Entries are kept newest first and capped; adding beyond the cap evicts
//! the oldest. The store is client-owned state and is never sent back to
//! the server.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use taskdeck_proto::notification::Notification;

/// Default number of retained notifications.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 50;

/// Errors loading or saving the inbox.
#[derive(Debug, thiserror::Error)]
pub enum NotificationStoreError {
    /// The file could not be read or written.
    #[error("notifications file {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid JSON.
    #[error("corrupt notifications file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Persisted {
    notifications: Vec<Notification>,
    /// Written for readers of the file; recomputed from the entries on load.
    #[serde(default)]
    unread_count: usize,
}

/// Newest-first notification list with an unread counter.
#[derive(Debug, Clone)]
pub struct NotificationStore {
    entries: VecDeque<Notification>,
    unread: usize,
    capacity: usize,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

impl NotificationStore {
    /// Empty store retaining at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            unread: 0,
            capacity,
        }
    }

    /// Reads a store from `path`. A missing file yields an empty store.
    ///
    /// Entries beyond `capacity` are dropped and the unread count is
    /// recounted from what is kept.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationStoreError`] if the file is unreadable or corrupt.
    pub fn load(path: &Path, capacity: usize) -> Result<Self, NotificationStoreError> {
        let persisted: Persisted = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Persisted::default(),
            Err(source) => {
                return Err(NotificationStoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let mut entries: VecDeque<Notification> = persisted.notifications.into();
        entries.truncate(capacity);
        let unread = entries.iter().filter(|n| !n.read).count();
        if unread != persisted.unread_count {
            tracing::debug!(
                stored = persisted.unread_count,
                counted = unread,
                "recounted unread notifications"
            );
        }
        Ok(Self {
            entries,
            unread,
            capacity,
        })
    }

    /// Writes the store to `path`, creating the parent directory.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationStoreError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), NotificationStoreError> {
        let io = |source| NotificationStoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io)?;
        }
        let persisted = Persisted {
            notifications: self.entries.iter().cloned().collect(),
            unread_count: self.unread,
        };
        std::fs::write(path, serde_json::to_string_pretty(&persisted)?).map_err(io)
    }

    /// Inserts `notification` at the front as unread.
    ///
    /// The id is taken from `data.id` when present, otherwise generated;
    /// `createdAt` is stamped when missing. Returns the assigned id.
    pub fn add(&mut self, mut notification: Notification) -> String {
        let id = notification
            .data_id()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        notification.id = Some(id.clone());
        notification.read = false;
        notification.created_at.get_or_insert_with(Utc::now);

        self.entries.push_front(notification);
        self.unread += 1;
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                if !evicted.read {
                    self.unread = self.unread.saturating_sub(1);
                }
            }
        }
        tracing::debug!(id = %id, unread = self.unread, "notification added");
        id
    }

    /// Marks the entry with `id` read. Returns whether an unread entry
    /// was found; the unread count only drops in that case.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|n| n.id.as_deref() == Some(id) && !n.read)
        else {
            return false;
        };
        entry.read = true;
        self.unread = self.unread.saturating_sub(1);
        true
    }

    /// Marks every entry read.
    pub fn mark_all_read(&mut self) {
        for entry in &mut self.entries {
            entry.read = true;
        }
        self.unread = 0;
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.unread = 0;
    }

    /// Number of unread entries.
    #[must_use]
    pub const fn unread_count(&self) -> usize {
        self.unread
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }
}
