//! WebSocket push transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use taskdeck_proto::event::{self, ClientEvent, PushEvent};
use taskdeck_proto::project::ProjectId;

use super::{PushConfig, PushError};

type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// An authenticated connection to the push endpoint.
///
/// Created via [`PushChannel::connect`], which performs the upgrade with the
/// bearer credential and spawns a background reader. Decoded events are
/// delivered through [`PushChannel::next_event`].
pub struct PushChannel {
    url: String,
    ws_sender: Arc<Mutex<WsSender>>,
    incoming: Mutex<mpsc::Receiver<PushEvent>>,
    connected: Arc<AtomicBool>,
    joined: Mutex<Option<ProjectId>>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl PushChannel {
    /// Connects to `config.url` with `Authorization: Bearer <token>`.
    ///
    /// # Errors
    ///
    /// - [`PushError::NoCredential`] when `config.token` is `None`; no
    ///   connection is attempted.
    /// - [`PushError::Timeout`] if the handshake exceeds `connect_timeout`.
    /// - [`PushError::Unreachable`] for refused connections, bad URLs and
    ///   rejected upgrades.
    pub async fn connect(config: &PushConfig) -> Result<Self, PushError> {
        let Some(token) = config.token.as_deref() else {
            return Err(PushError::NoCredential);
        };

        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(map_ws_connect_error)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| PushError::Unreachable(format!("invalid credential header: {e}")))?;
        request.headers_mut().insert("Authorization", bearer);

        let (ws_stream, _response) =
            tokio::time::timeout(config.connect_timeout, connect_async(request))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %config.url, "push connect timed out");
                    PushError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = %config.url, err = %e, "push connect failed");
                    map_ws_connect_error(e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&connected)));

        tracing::info!(url = %config.url, "push channel connected");
        Ok(Self {
            url: config.url.clone(),
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            incoming: Mutex::new(rx),
            connected,
            joined: Mutex::new(None),
            reader_handle,
        })
    }

    /// The endpoint this channel is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the connection is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// The project room currently joined, if any.
    pub async fn joined(&self) -> Option<ProjectId> {
        self.joined.lock().await.clone()
    }

    /// Joins `project`'s room, leaving the previously joined room first.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::ConnectionClosed`] if the connection is down.
    pub async fn join(&self, project: &ProjectId) -> Result<(), PushError> {
        let mut joined = self.joined.lock().await;
        if joined.as_ref() == Some(project) {
            return Ok(());
        }
        if let Some(previous) = joined.take() {
            self.send(&ClientEvent::LeaveProject(previous)).await?;
        }
        self.send(&ClientEvent::JoinProject(project.clone())).await?;
        tracing::debug!(project = %project.as_str(), "joined project room");
        *joined = Some(project.clone());
        Ok(())
    }

    /// Leaves `project`'s room.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::ConnectionClosed`] if the connection is down.
    pub async fn leave(&self, project: &ProjectId) -> Result<(), PushError> {
        let mut joined = self.joined.lock().await;
        self.send(&ClientEvent::LeaveProject(project.clone())).await?;
        if joined.as_ref() == Some(project) {
            *joined = None;
        }
        tracing::debug!(project = %project.as_str(), "left project room");
        Ok(())
    }

    /// Waits for the next decoded event.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::ConnectionClosed`] once the reader has exited
    /// and every buffered event was consumed.
    pub async fn next_event(&self) -> Result<PushEvent, PushError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(PushError::ConnectionClosed)
    }

    /// Leaves the joined room (if any) and closes the connection.
    ///
    /// Teardown is best-effort: send failures on an already broken
    /// connection are logged, not returned.
    pub async fn close(self) {
        let joined = self.joined.lock().await.take();
        if let Some(project) = joined {
            if let Err(e) = self.send(&ClientEvent::LeaveProject(project)).await {
                tracing::debug!(err = %e, "leave on close failed");
            }
        }
        if let Err(e) = self.ws_sender.lock().await.close().await {
            tracing::debug!(err = %e, "push close handshake failed");
        }
        self.connected.store(false, Ordering::Relaxed);
        self.reader_handle.abort();
        tracing::info!(url = %self.url, "push channel closed");
    }

    async fn send(&self, event: &ClientEvent) -> Result<(), PushError> {
        if !self.is_connected() {
            return Err(PushError::ConnectionClosed);
        }
        let text = event::encode_client(event)?;
        self.ws_sender
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, event = event.name(), "push send failed");
                self.connected.store(false, Ordering::Relaxed);
                PushError::ConnectionClosed
            })
    }
}

/// Reads text frames, decodes them and forwards events to `tx`.
///
/// Malformed frames and unknown event names are logged and skipped; the
/// loop only ends on close, read error, or when the receiver is dropped.
async fn reader_loop(mut ws_reader: WsReader, tx: mpsc::Sender<PushEvent>, connected: Arc<AtomicBool>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match event::decode(text.as_str()) {
                Ok(PushEvent::Unknown { name }) => {
                    tracing::debug!(event = %name, "ignoring unknown push event");
                }
                Ok(event) => {
                    tracing::trace!(event = event.name(), "push event received");
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed push frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("push channel closed by server");
                break;
            }
            Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "push channel read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!("push reader task exiting");
}

fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> PushError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => PushError::Unreachable(io_err.to_string()),
        WsError::Http(response) => {
            PushError::Unreachable(format!("upgrade rejected: status {}", response.status()))
        }
        WsError::ConnectionClosed | WsError::AlreadyClosed => PushError::ConnectionClosed,
        other => PushError::Unreachable(other.to_string()),
    }
}
