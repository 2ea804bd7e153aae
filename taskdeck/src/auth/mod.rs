//! Signed-in session state shared by the HTTP client, the push channel and
//! the CLI.
//!
//! [`AuthSession`] is the in-memory view; every change is mirrored to the
//! optional [`SessionStore`] and announced as a [`SessionEvent`].

pub mod store;

pub use store::{SessionStore, SessionStoreError, StoredSession};

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use taskdeck_proto::user::{AuthResponse, TokenPair, User};

const SESSION_EVENT_BUFFER: usize = 16;

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A user signed in.
    SignedIn,
    /// The credential pair was replaced after a refresh.
    TokensRefreshed,
    /// The session ended, either by request or because refresh failed.
    SignedOut,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<Option<StoredSession>>,
    store: Option<SessionStore>,
    events: broadcast::Sender<SessionEvent>,
}

/// Cloneable handle to the current session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    inner: Arc<Inner>,
}

impl AuthSession {
    /// Session with no persistence, starting signed out.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_state(None, None)
    }

    /// Session persisted to `store`, restored from it if a session exists.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] if the stored file is unreadable.
    pub fn load(store: SessionStore) -> Result<Self, SessionStoreError> {
        let state = store.load()?;
        if state.is_some() {
            tracing::debug!(path = %store.path().display(), "restored session");
        }
        Ok(Self::with_state(state, Some(store)))
    }

    fn with_state(state: Option<StoredSession>, store: Option<SessionStore>) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                store,
                events,
            }),
        }
    }

    /// Receives session lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Current bearer credential.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.inner.state.read().as_ref().map(|s| s.access_token.clone())
    }

    /// Current refresh credential.
    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.inner.state.read().as_ref().map(|s| s.refresh_token.clone())
    }

    /// Last known profile.
    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.inner.state.read().as_ref().and_then(|s| s.user.clone())
    }

    /// Whether a credential is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.read().is_some()
    }

    /// Records a successful login or registration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] if persisting fails; the in-memory
    /// session is updated regardless.
    pub fn sign_in(&self, auth: AuthResponse) -> Result<(), SessionStoreError> {
        let session = StoredSession {
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
            user: Some(auth.user),
        };
        *self.inner.state.write() = Some(session.clone());
        tracing::info!("signed in");
        self.emit(SessionEvent::SignedIn);
        self.persist(&session)
    }

    /// Replaces the credential pair, keeping the profile.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] if persisting fails.
    pub fn set_tokens(&self, tokens: TokenPair) -> Result<(), SessionStoreError> {
        let session = {
            let mut state = self.inner.state.write();
            let user = state.as_ref().and_then(|s| s.user.clone());
            let session = StoredSession {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                user,
            };
            *state = Some(session.clone());
            session
        };
        self.emit(SessionEvent::TokensRefreshed);
        self.persist(&session)
    }

    /// Replaces the stored profile. Ignored when signed out.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] if persisting fails.
    pub fn set_user(&self, user: User) -> Result<(), SessionStoreError> {
        let session = {
            let mut state = self.inner.state.write();
            let Some(session) = state.as_mut() else {
                return Ok(());
            };
            session.user = Some(user);
            session.clone()
        };
        self.persist(&session)
    }

    /// Forgets the session in memory and on disk.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] if the file cannot be removed; the
    /// in-memory session is cleared regardless.
    pub fn sign_out(&self) -> Result<(), SessionStoreError> {
        *self.inner.state.write() = None;
        tracing::info!("signed out");
        self.emit(SessionEvent::SignedOut);
        match &self.inner.store {
            Some(store) => store.clear(),
            None => Ok(()),
        }
    }

    fn persist(&self, session: &StoredSession) -> Result<(), SessionStoreError> {
        match &self.inner.store {
            Some(store) => store.save(session),
            None => Ok(()),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}
