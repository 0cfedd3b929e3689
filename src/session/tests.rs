//! Session behaviour tests over an in-memory WebSocket pair

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use super::*;
use crate::config::SocketConfig;
use crate::registry::SessionRegistry;
use crate::socketapi::{Envelope, EnvelopeMessage, MatchJoin};

pub(crate) type TestClient = WebSocketStream<DuplexStream>;

/// Short keep-alive timings for liveness tests
pub(crate) fn test_config() -> SocketConfig {
    SocketConfig {
        ping_period_ms: 50,
        pong_wait_ms: 150,
        write_wait_ms: 100,
        received_message_decrement_count: 1,
        outgoing_queue_size: 8,
        max_message_size: 4096,
    }
}

/// Timings long enough that keep-alive never interferes
fn quiet_config() -> SocketConfig {
    SocketConfig {
        ping_period_ms: 5_000,
        pong_wait_ms: 10_000,
        ..test_config()
    }
}

/// Registry double that records every removal
#[derive(Default)]
pub(crate) struct RecordingRegistry {
    removed: Mutex<Vec<Uuid>>,
}

impl RecordingRegistry {
    pub(crate) fn removed(&self) -> Vec<Uuid> {
        self.removed.lock().unwrap().clone()
    }
}

impl SessionRegistry for RecordingRegistry {
    fn remove(&self, session_id: Uuid) {
        self.removed.lock().unwrap().push(session_id);
    }
}

fn test_identity() -> SessionIdentity {
    let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
    SessionIdentity::new("user-1", "alice", 1_700_000_000, addr)
}

pub(crate) async fn test_session_with_registry(
    config: &SocketConfig,
    registry: Arc<dyn SessionRegistry>,
) -> (Arc<Session>, TestClient) {
    session_over_duplex(config, registry, 64 * 1024).await
}

/// Session whose transport buffers at most `buffer` bytes the client has not read
async fn session_over_duplex(
    config: &SocketConfig,
    registry: Arc<dyn SessionRegistry>,
    buffer: usize,
) -> (Arc<Session>, TestClient) {
    let (server_io, client_io) = tokio::io::duplex(buffer);
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    (Session::new(test_identity(), server, config, registry), client)
}

pub(crate) async fn test_session(
    config: &SocketConfig,
) -> (Arc<Session>, TestClient, Arc<RecordingRegistry>) {
    let registry = Arc::new(RecordingRegistry::default());
    let (session, client) = test_session_with_registry(config, registry.clone()).await;
    (session, client, registry)
}

fn spawn_consume<H: MessageHandler>(session: &Arc<Session>, handler: H) -> JoinHandle<()> {
    let session = Arc::clone(session);
    tokio::spawn(async move { session.consume(handler).await })
}

fn counting_handler(count: Arc<AtomicUsize>) -> impl MessageHandler {
    move |_session: Arc<Session>, _envelope: Envelope| {
        let count = Arc::clone(&count);
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            true
        }
    }
}

fn keep_going() -> impl MessageHandler {
    |_session: Arc<Session>, _envelope: Envelope| async { true }
}

fn join_envelope(cid: impl Into<String>) -> Envelope {
    Envelope::with_cid(
        cid,
        EnvelopeMessage::MatchJoin(MatchJoin {
            match_id: "m1".to_string(),
        }),
    )
}

/// Next text frame seen by the client, skipping control frames
async fn next_text(client: &mut TestClient) -> String {
    loop {
        match client.next().await {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(_)) => continue,
            other => panic!("Expected text frame, got {:?}", other),
        }
    }
}

async fn wait_for_consume(handle: JoinHandle<()>) {
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("consume did not return")
        .unwrap();
}

// -------------------------------------------------------------------------
// Construction and accessors
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_new_session_accessors() {
    let (session, _client, _registry) = test_session(&quiet_config()).await;

    assert!(!session.id().is_nil());
    assert_eq!(session.user_id(), "user-1");
    assert_eq!(session.username().await, "alice");
    assert_eq!(session.expiry(), 1_700_000_000);
    assert_eq!(session.client_ip().to_string(), "127.0.0.1");
    assert_eq!(session.client_port(), 4000);
    assert_eq!(session.status().await, SessionStatus::Open);
    assert!(!session.is_closed());
}

#[tokio::test]
async fn test_sessions_get_distinct_ids() {
    let (first, _c1, _r1) = test_session(&quiet_config()).await;
    let (second, _c2, _r2) = test_session(&quiet_config()).await;
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn test_set_username() {
    let (session, _client, _registry) = test_session(&quiet_config()).await;
    session.set_username("bob").await;
    assert_eq!(session.username().await, "bob");
}

// -------------------------------------------------------------------------
// Close
// -------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_is_idempotent() {
    let (session, mut client, registry) = test_session(&quiet_config()).await;

    let closers: Vec<_> = (0..16)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.close().await })
        })
        .collect();
    for closer in closers {
        closer.await.unwrap();
    }

    assert_eq!(registry.removed(), vec![session.id()]);
    assert_eq!(session.status().await, SessionStatus::Closed);

    let frame = timeout(Duration::from_secs(1), client.next()).await.unwrap();
    assert!(matches!(frame, Some(Ok(Message::Close(None)))));
}

#[tokio::test]
async fn test_close_unblocks_running_consume() {
    let (session, _client, registry) = test_session(&quiet_config()).await;
    let consume = spawn_consume(&session, keep_going());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.status().await, SessionStatus::Live);

    session.close().await;
    wait_for_consume(consume).await;
    assert_eq!(registry.removed().len(), 1);
}

#[tokio::test]
async fn test_send_after_close_is_silent() {
    let (session, _client, _registry) = test_session(&quiet_config()).await;
    session.close().await;

    assert!(session.send(false, 0, &join_envelope("1")).await.is_ok());
    assert!(session.send_bytes(true, 0, b"{}".to_vec()).await.is_ok());
    assert_eq!(session.queue.len(), 0);
}

#[tokio::test]
async fn test_consume_after_close_returns_immediately() {
    let (session, _client, registry) = test_session(&quiet_config()).await;
    session.close().await;

    let consume = spawn_consume(&session, keep_going());
    wait_for_consume(consume).await;
    assert_eq!(registry.removed().len(), 1);
}

// -------------------------------------------------------------------------
// Send path
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_full_queue_closes_session() {
    let config = SocketConfig {
        outgoing_queue_size: 2,
        ..quiet_config()
    };
    let (session, _client, registry) = test_session(&config).await;

    session.send_bytes(false, 0, b"{}".to_vec()).await.unwrap();
    session.send_bytes(false, 0, b"{}".to_vec()).await.unwrap();

    let result = timeout(
        Duration::from_millis(500),
        session.send_bytes(false, 0, b"{}".to_vec()),
    )
    .await
    .expect("non-stream send must not block");

    assert!(matches!(result, Err(SessionError::OutgoingQueueFull)));
    assert!(session.is_closed());
    assert_eq!(registry.removed(), vec![session.id()]);
}

#[tokio::test]
async fn test_stream_send_waits_for_writer() {
    let config = SocketConfig {
        outgoing_queue_size: 1,
        ..quiet_config()
    };
    let (session, mut client, _registry) = test_session(&config).await;
    session.send_bytes(false, 0, b"\"first\"".to_vec()).await.unwrap();

    let stream_send = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.send_bytes(true, 0, b"\"second\"".to_vec()).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stream_send.is_finished());

    // Starting the writer drains the queue and lets the stream send through.
    let _consume = spawn_consume(&session, keep_going());
    let result = timeout(Duration::from_secs(1), stream_send).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(!session.is_closed());

    assert_eq!(next_text(&mut client).await, "\"first\"");
    assert_eq!(next_text(&mut client).await, "\"second\"");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_arrive_whole_and_ordered() {
    let config = SocketConfig {
        outgoing_queue_size: 256,
        ..quiet_config()
    };
    let (session, mut client, _registry) = test_session(&config).await;
    let _consume = spawn_consume(&session, keep_going());

    let producers: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|prefix| {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                for i in 0..50 {
                    session
                        .send(false, 0, &join_envelope(format!("{prefix}-{i}")))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    let mut next_index = [0usize; 2];
    for _ in 0..100 {
        let text = timeout(Duration::from_secs(1), next_text(&mut client))
            .await
            .unwrap();
        let envelope = Envelope::from_json(&text).expect("frame must be a whole envelope");
        let (prefix, index) = envelope.cid.split_once('-').unwrap();
        let slot = if prefix == "a" { 0 } else { 1 };
        assert_eq!(index.parse::<usize>().unwrap(), next_index[slot]);
        next_index[slot] += 1;
    }
    assert_eq!(next_index, [50, 50]);
}

#[tokio::test]
async fn test_sends_do_not_wait_for_stalled_writer() {
    let config = SocketConfig {
        outgoing_queue_size: 2,
        ..quiet_config()
    };
    let registry = Arc::new(RecordingRegistry::default());
    // The client never reads, so a large frame stalls the writer mid-write.
    let (session, _client) = session_over_duplex(&config, registry.clone(), 1024).await;
    let consume = spawn_consume(&session, keep_going());

    session.send_bytes(false, 0, vec![b'x'; 4096]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.queue.len(), 0, "writer should be stuck on the large frame");

    for _ in 0..2 {
        let result = timeout(
            Duration::from_millis(200),
            session.send_bytes(false, 0, b"{}".to_vec()),
        )
        .await
        .expect("non-stream send must not wait for the writer");
        assert!(result.is_ok());
    }
    assert!(!session.is_closed());

    let result = timeout(
        Duration::from_secs(1),
        session.send_bytes(false, 0, b"{}".to_vec()),
    )
    .await
    .expect("overflowing send must not wait for the writer");
    assert!(matches!(result, Err(SessionError::OutgoingQueueFull)));
    assert!(session.is_closed());
    assert_eq!(registry.removed(), vec![session.id()]);

    wait_for_consume(consume).await;
}

#[tokio::test]
async fn test_send_bytes_rejects_invalid_utf8() {
    let (session, _client, _registry) = test_session(&quiet_config()).await;
    let result = session.send_bytes(false, 0, vec![0xff, 0xfe]).await;
    assert!(matches!(result, Err(SessionError::InvalidPayload(_))));
    assert!(!session.is_closed());
}

// -------------------------------------------------------------------------
// Read loop
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let (session, mut client, _registry) = test_session(&quiet_config()).await;
    let count = Arc::new(AtomicUsize::new(0));
    let _consume = spawn_consume(&session, counting_handler(Arc::clone(&count)));

    client.send(Message::Text("{not json".to_string())).await.unwrap();
    client
        .send(Message::Text(join_envelope("1").to_json().unwrap()))
        .await
        .unwrap();

    timeout(Duration::from_secs(1), async {
        while count.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!session.is_closed());
}

#[tokio::test]
async fn test_handler_reply_reaches_client() {
    let (session, mut client, _registry) = test_session(&quiet_config()).await;
    let echo = |session: Arc<Session>, envelope: Envelope| async move {
        session.send(false, 0, &envelope).await.is_ok()
    };
    let _consume = spawn_consume(&session, echo);

    client
        .send(Message::Text(join_envelope("42").to_json().unwrap()))
        .await
        .unwrap();

    let text = timeout(Duration::from_secs(1), next_text(&mut client))
        .await
        .unwrap();
    assert_eq!(Envelope::from_json(&text).unwrap(), join_envelope("42"));
}

#[tokio::test]
async fn test_handler_false_closes_session() {
    let (session, mut client, registry) = test_session(&quiet_config()).await;
    let stop = |_session: Arc<Session>, _envelope: Envelope| async { false };
    let consume = spawn_consume(&session, stop);

    client
        .send(Message::Text(join_envelope("1").to_json().unwrap()))
        .await
        .unwrap();

    wait_for_consume(consume).await;
    assert!(session.is_closed());
    assert_eq!(registry.removed().len(), 1);
}

#[tokio::test]
async fn test_peer_close_ends_session() {
    let (session, mut client, registry) = test_session(&quiet_config()).await;
    let consume = spawn_consume(&session, keep_going());

    client.close(None).await.unwrap();

    wait_for_consume(consume).await;
    assert_eq!(session.status().await, SessionStatus::Closed);
    assert_eq!(registry.removed().len(), 1);
}

#[tokio::test]
async fn test_oversized_message_closes_session() {
    let config = SocketConfig {
        max_message_size: 32,
        ..quiet_config()
    };
    let (session, mut client, _registry) = test_session(&config).await;
    let count = Arc::new(AtomicUsize::new(0));
    let consume = spawn_consume(&session, counting_handler(Arc::clone(&count)));

    client.send(Message::Text("x".repeat(100))).await.unwrap();

    wait_for_consume(consume).await;
    assert!(session.is_closed());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_second_consume_returns_immediately() {
    let (session, _client, _registry) = test_session(&quiet_config()).await;
    let first = spawn_consume(&session, keep_going());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = spawn_consume(&session, keep_going());
    wait_for_consume(second).await;
    assert!(!session.is_closed());

    session.close().await;
    wait_for_consume(first).await;
}

#[tokio::test]
async fn test_dropped_consume_still_closes() {
    let (session, _client, registry) = test_session(&quiet_config()).await;
    let consume = spawn_consume(&session, keep_going());
    tokio::time::sleep(Duration::from_millis(20)).await;

    consume.abort();
    let _ = consume.await;

    timeout(Duration::from_secs(1), async {
        while registry.removed().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(session.is_closed());
}

// -------------------------------------------------------------------------
// Keep-alive
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_silent_peer_is_closed() {
    let (session, _client, registry) = test_session(&test_config()).await;
    let consume = spawn_consume(&session, keep_going());

    // The client never reads, so it never answers pings.
    wait_for_consume(consume).await;
    assert!(session.is_closed());
    assert_eq!(registry.removed(), vec![session.id()]);
}

#[tokio::test]
async fn test_pongs_keep_session_alive() {
    let (session, mut client, _registry) = test_session(&test_config()).await;
    let _consume = spawn_consume(&session, keep_going());

    // Reading lets the client answer every ping with a pong.
    let _ = timeout(Duration::from_millis(500), async {
        while let Some(Ok(_)) = client.next().await {}
    })
    .await;

    assert!(!session.is_closed());
    session.close().await;
}

#[tokio::test]
async fn test_data_messages_keep_session_alive() {
    let config = SocketConfig {
        received_message_decrement_count: 2,
        ..test_config()
    };
    let (session, mut client, _registry) = test_session(&config).await;
    let _consume = spawn_consume(&session, keep_going());

    // No reads, so no pongs: only data traffic extends the deadline.
    for i in 0..20 {
        client
            .send(Message::Text(join_envelope(i.to_string()).to_json().unwrap()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    assert!(!session.is_closed());
    session.close().await;
}

#[tokio::test]
async fn test_pings_follow_ping_period() {
    let config = SocketConfig {
        ping_period_ms: 50,
        pong_wait_ms: 1_000,
        ..test_config()
    };
    let (session, mut client, _registry) = test_session(&config).await;
    let _consume = spawn_consume(&session, keep_going());

    let mut pings = 0;
    let _ = timeout(Duration::from_millis(330), async {
        while let Some(Ok(message)) = client.next().await {
            if matches!(message, Message::Ping(_)) {
                pings += 1;
            }
        }
    })
    .await;

    assert!((3..=8).contains(&pings), "saw {pings} pings");
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_ping_write_is_bounded() {
    let config = SocketConfig {
        ping_period_ms: 1_000,
        pong_wait_ms: 600_000,
        ..test_config()
    };
    let registry = Arc::new(RecordingRegistry::default());
    // Room for a handful of pings the client never reads.
    let (session, _client) = session_over_duplex(&config, registry.clone(), 16).await;

    let started = Instant::now();
    let consume = spawn_consume(&session, keep_going());
    timeout(Duration::from_secs(300), consume)
        .await
        .expect("stalled ping write must end the session")
        .unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= WRITE_DEADLINE, "closed after {elapsed:?}");
    assert!(elapsed < config.pong_wait(), "closed after {elapsed:?}");
    assert_eq!(registry.removed(), vec![session.id()]);
}
