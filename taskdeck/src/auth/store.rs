//! On-disk session persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use taskdeck_proto::user::User;

/// Errors reading or writing the session file.
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    /// The file could not be read, written or removed.
    #[error("session file {path}: {source}")]
    Io {
        /// Session file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file exists but is not a valid session.
    #[error("corrupt session file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Credentials and profile kept between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    /// Bearer credential.
    pub access_token: String,
    /// Refresh credential.
    pub refresh_token: String,
    /// Last known profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// JSON file holding a [`StoredSession`].
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store backed by `path`. Nothing is touched until the first call.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored session. A missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] if the file cannot be read or parsed.
    pub fn load(&self) -> Result<Option<StoredSession>, SessionStoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Writes `session`, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError::Io`] if the file cannot be written.
    pub fn save(&self, session: &StoredSession) -> Result<(), SessionStoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, json).map_err(|e| self.io_error(e))
    }

    /// Deletes the file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError::Io`] if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<(), SessionStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> SessionStoreError {
        SessionStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
