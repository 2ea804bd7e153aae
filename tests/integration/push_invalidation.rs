//! Integration tests for the push channel and cache invalidation.
//!
//! Runs [`PushChannel`] against an in-process WebSocket server:
//! - the bearer credential rides on the upgrade request
//! - room membership frames (`join-project` / `leave-project`)
//! - lifecycle events invalidate exactly the affected cache keys
//! - notifications land in the notification store
//! - malformed frames are skipped without disconnecting

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use taskdeck::cache::{CacheKey, CachedValue, Freshness, QueryCache};
use taskdeck::notifications::NotificationStore;
use taskdeck::push::{PushChannel, PushConfig, PushError, PushInvalidator};
use taskdeck_proto::event::{self, ClientEvent};
use taskdeck_proto::project::ProjectId;
use taskdeck_proto::task::TaskId;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a one-connection push server.
struct PushServer {
    url: String,
    auth: oneshot::Receiver<Option<String>>,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl PushServer {
    fn push(&self, frame: &str) {
        self.to_client.send(frame.to_string()).unwrap();
    }

    async fn next_client_event(&mut self) -> ClientEvent {
        let text = tokio::time::timeout(TIMEOUT, self.from_client.recv())
            .await
            .expect("client frame timed out")
            .expect("server stopped");
        event::decode_client(&text)
            .unwrap()
            .expect("client frame is a room event")
    }
}

async fn start_push_server() -> PushServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (auth_tx, auth) = oneshot::channel();
    let (to_client, mut outgoing) = mpsc::unbounded_channel::<String>();
    let (incoming, from_client) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let header = request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let _ = auth_tx.send(header);
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, capture)
            .await
            .unwrap();
        let (mut sink, mut source) = ws.split();
        loop {
            tokio::select! {
                frame = outgoing.recv() => match frame {
                    Some(text) => sink.send(Message::Text(text.into())).await.unwrap(),
                    None => {
                        let _ = sink.close().await;
                        break;
                    }
                },
                msg = source.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = incoming.send(text.as_str().to_string());
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    });

    PushServer {
        url,
        auth,
        to_client,
        from_client,
    }
}

fn config(url: &str) -> PushConfig {
    PushConfig {
        url: url.to_string(),
        token: Some("access-123".to_string()),
        connect_timeout: TIMEOUT,
        channel_capacity: 16,
    }
}

fn invalidator() -> (PushInvalidator, QueryCache, Arc<Mutex<NotificationStore>>) {
    let cache = QueryCache::new();
    let notifications = Arc::new(Mutex::new(NotificationStore::default()));
    (
        PushInvalidator::new(cache.clone(), Arc::clone(&notifications)),
        cache,
        notifications,
    )
}

async fn apply_next(channel: &PushChannel, invalidator: &PushInvalidator) {
    let event = tokio::time::timeout(TIMEOUT, channel.next_event())
        .await
        .expect("push event timed out")
        .unwrap();
    invalidator.handle(event);
}

// =============================================================================
// Connection
// =============================================================================

#[tokio::test]
async fn bearer_credential_is_sent_on_upgrade() {
    let server = start_push_server().await;
    let _channel = PushChannel::connect(&config(&server.url)).await.unwrap();

    let header = tokio::time::timeout(TIMEOUT, server.auth)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(header.as_deref(), Some("Bearer access-123"));
}

#[tokio::test]
async fn no_credential_means_no_connection() {
    let server = start_push_server().await;
    let mut cfg = config(&server.url);
    cfg.token = None;

    let result = PushChannel::connect(&cfg).await;

    assert!(matches!(result, Err(PushError::NoCredential)));
}

#[tokio::test]
async fn room_membership_frames() {
    let mut server = start_push_server().await;
    let channel = PushChannel::connect(&config(&server.url)).await.unwrap();
    let p1 = ProjectId::new("p1");
    let p2 = ProjectId::new("p2");

    channel.join(&p1).await.unwrap();
    assert_eq!(
        server.next_client_event().await,
        ClientEvent::JoinProject(p1.clone())
    );

    // Switching rooms leaves the old one first.
    channel.join(&p2).await.unwrap();
    assert_eq!(
        server.next_client_event().await,
        ClientEvent::LeaveProject(p1)
    );
    assert_eq!(
        server.next_client_event().await,
        ClientEvent::JoinProject(p2.clone())
    );
    assert_eq!(channel.joined().await, Some(p2.clone()));

    // Teardown leaves the joined room before closing.
    channel.close().await;
    assert_eq!(server.next_client_event().await, ClientEvent::LeaveProject(p2));
}

// =============================================================================
// Invalidation
// =============================================================================

#[tokio::test]
async fn deleted_task_invalidates_unscoped_and_project_lists() {
    let server = start_push_server().await;
    let channel = PushChannel::connect(&config(&server.url)).await.unwrap();
    let (invalidator, cache, _) = invalidator();
    let p1 = CacheKey::project_tasks(&ProjectId::new("p1"));
    let p2 = CacheKey::project_tasks(&ProjectId::new("p2"));
    for key in [&CacheKey::tasks(), &p1, &p2] {
        cache.set(key, CachedValue::Tasks(Vec::new()));
    }

    server.push(r#"{"event":"task:deleted","data":{"id":"t1","projectId":"p1"}}"#);
    apply_next(&channel, &invalidator).await;

    assert_eq!(cache.freshness(&CacheKey::tasks()), Freshness::Stale);
    assert_eq!(cache.freshness(&p1), Freshness::Stale);
    assert_eq!(cache.freshness(&p2), Freshness::Fresh);
}

#[tokio::test]
async fn updated_task_invalidates_its_detail_key() {
    let server = start_push_server().await;
    let channel = PushChannel::connect(&config(&server.url)).await.unwrap();
    let (invalidator, cache, _) = invalidator();
    let detail = CacheKey::task(&TaskId::new("t1"));
    let other = CacheKey::task(&TaskId::new("t2"));
    cache.set(&detail, CachedValue::Tasks(Vec::new()));
    cache.set(&other, CachedValue::Tasks(Vec::new()));

    server.push(
        r#"{"event":"task:updated","data":{"id":"t1","title":"x","status":"DONE","order":0,
            "projectId":"p1","createdAt":"2026-01-01T00:00:00Z","updatedAt":"2026-01-01T00:00:00Z"}}"#,
    );
    apply_next(&channel, &invalidator).await;

    assert_eq!(cache.freshness(&detail), Freshness::Stale);
    assert_eq!(cache.freshness(&other), Freshness::Fresh);
}

#[tokio::test]
async fn unscoped_reorder_invalidates_every_task_key() {
    let server = start_push_server().await;
    let channel = PushChannel::connect(&config(&server.url)).await.unwrap();
    let (invalidator, cache, _) = invalidator();
    let scoped = CacheKey::project_tasks(&ProjectId::new("p1"));
    cache.set(&CacheKey::tasks(), CachedValue::Tasks(Vec::new()));
    cache.set(&scoped, CachedValue::Tasks(Vec::new()));
    cache.set(&CacheKey::projects(), CachedValue::Projects(Vec::new()));

    server.push(r#"{"event":"tasks:reordered"}"#);
    apply_next(&channel, &invalidator).await;

    assert_eq!(cache.freshness(&CacheKey::tasks()), Freshness::Stale);
    assert_eq!(cache.freshness(&scoped), Freshness::Stale);
    assert_eq!(cache.freshness(&CacheKey::projects()), Freshness::Fresh);
}

#[tokio::test]
async fn notification_is_added_to_store() {
    let server = start_push_server().await;
    let channel = PushChannel::connect(&config(&server.url)).await.unwrap();
    let (invalidator, cache, notifications) = invalidator();
    cache.set(&CacheKey::tasks(), CachedValue::Tasks(Vec::new()));

    server.push(
        r#"{"event":"notification","data":{"type":"TASK_ASSIGNED","title":"Assigned",
            "message":"You were assigned","userId":"u1","data":{"id":"t9"}}}"#,
    );
    apply_next(&channel, &invalidator).await;

    let store = notifications.lock();
    assert_eq!(store.unread_count(), 1);
    assert_eq!(store.iter().next().unwrap().id.as_deref(), Some("t9"));
    assert_eq!(cache.freshness(&CacheKey::tasks()), Freshness::Fresh);
}

#[tokio::test]
async fn malformed_frames_do_not_disconnect() {
    let server = start_push_server().await;
    let channel = PushChannel::connect(&config(&server.url)).await.unwrap();
    let (invalidator, cache, _) = invalidator();
    cache.set(&CacheKey::projects(), CachedValue::Projects(Vec::new()));

    server.push("{not json");
    server.push(r#"{"event":"task:deleted","data":{"id":"t1"}}"#);
    server.push(r#"{"event":"comment:added","data":{}}"#);
    server.push(
        r#"{"event":"project:updated","data":{"id":"p1","name":"Launch","ownerId":"u1",
            "createdAt":"2026-01-01T00:00:00Z","updatedAt":"2026-01-01T00:00:00Z"}}"#,
    );
    apply_next(&channel, &invalidator).await;

    assert!(channel.is_connected());
    assert_eq!(cache.freshness(&CacheKey::projects()), Freshness::Stale);
}

#[tokio::test]
async fn run_stops_when_server_closes() {
    let server = start_push_server().await;
    let channel = PushChannel::connect(&config(&server.url)).await.unwrap();
    let (invalidator, _, _) = invalidator();

    server.push(r#"{"event":"tasks:reordered","data":{"projectId":"p1"}}"#);
    let PushServer { to_client, .. } = server;
    drop(to_client);

    let mut seen = Vec::new();
    let closed = tokio::time::timeout(
        TIMEOUT,
        invalidator.run(&channel, |event, applied| {
            seen.push((event.name().to_string(), applied.len()));
        }),
    )
    .await
    .expect("run did not return after close");

    assert!(matches!(closed, PushError::ConnectionClosed));
    assert_eq!(seen, vec![(event::TASKS_REORDERED.to_string(), 2)]);
}
