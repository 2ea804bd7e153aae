//! Live push channel.
//!
//! [`PushChannel`] holds the authenticated WebSocket connection and room
//! membership; [`PushInvalidator`] consumes its events and turns them into
//! cache invalidations and notification-store appends.

mod channel;
mod invalidator;

use std::time::Duration;

pub use channel::PushChannel;
pub use invalidator::{Invalidation, PushInvalidator, keys_for};

use taskdeck_proto::event::CodecError;

/// Errors produced by the push channel.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// No access credential is available, so no connection is attempted.
    #[error("not signed in; push channel requires an access token")]
    NoCredential,

    /// The WebSocket handshake did not complete in time.
    #[error("push channel connect timed out")]
    Timeout,

    /// The push endpoint could not be reached.
    #[error("push endpoint unreachable: {0}")]
    Unreachable(String),

    /// The connection is closed.
    #[error("push channel closed")]
    ConnectionClosed,

    /// An outgoing frame could not be encoded.
    #[error("push codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Connection settings for [`PushChannel::connect`].
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Bearer credential; `None` means signed out.
    pub token: Option<String>,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Buffered inbound events before the reader applies backpressure.
    pub channel_capacity: usize,
}
