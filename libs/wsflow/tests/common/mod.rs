//! Common test utilities for wsflow integration tests
//!
//! Provides an in-memory transport with a scripted server side, a small
//! JSON adapter, and a real WebSocket echo server for transport tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use wsflow::{
    AuthExpiry, AuthHandler, AuthResponse, ClientEvent, Connection, ConnectionHandler,
    ConnectionInfo, ConnectionOptions, ConnectionParams, Credentials, ErrorHandler, InboundKind,
    MessageHandler, RateLimitHandler, ResponseMatcher, Result, SubscriptionHandler,
    SubscriptionKey, SubscriptionResponse, Transport, TransportEvent, TransportEventSink,
    TransportHandle, WsError, WsMessage,
};

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// Server-side script: frames to answer an outbound frame with
pub type Responder = Arc<dyn Fn(&WsMessage) -> Vec<WsMessage> + Send + Sync>;

#[derive(Default)]
struct MockState {
    sent: Vec<WsMessage>,
    connects: u32,
    fail_next: u32,
    sink: Option<TransportEventSink>,
    responder: Option<Responder>,
}

/// Transport that never touches the network
///
/// Every frame the client writes is recorded and, if a responder is set,
/// answered on the same socket.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder(
        self,
        responder: impl Fn(&WsMessage) -> Vec<WsMessage> + Send + Sync + 'static,
    ) -> Self {
        self.state.lock().responder = Some(Arc::new(responder));
        self
    }

    /// Refuse the next `n` connect attempts
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Drop the current socket from the server side
    pub fn disconnect(&self, reason: &str) {
        if let Some(sink) = self.state.lock().sink.take() {
            let _ = sink.send(TransportEvent::Disconnected(reason.to_string()));
        }
    }

    /// Push a frame from the server
    pub fn push(&self, frame: WsMessage) {
        if let Some(sink) = &self.state.lock().sink {
            let _ = sink.send(TransportEvent::Frame(frame));
        }
    }

    pub fn push_json(&self, value: Value) {
        self.push(WsMessage::from_json(&value));
    }

    pub fn connect_count(&self) -> u32 {
        self.state.lock().connects
    }

    pub fn sent(&self) -> Vec<WsMessage> {
        self.state.lock().sent.clone()
    }

    /// Sent text frames parsed as JSON
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent().iter().filter_map(WsMessage::json).collect()
    }

    /// Sent JSON frames with the given `op`
    pub fn sent_ops(&self, op: &str) -> Vec<Value> {
        self.sent_json()
            .into_iter()
            .filter(|frame| frame["op"] == op)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        params: &ConnectionParams,
        events: TransportEventSink,
    ) -> Result<Box<dyn TransportHandle>> {
        let mut state = self.state.lock();
        state.connects += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(WsError::Transport("connection refused".to_string()));
        }

        let _ = events.send(TransportEvent::Connected(ConnectionInfo {
            url: params.url(),
            protocol: None,
        }));
        state.sink = Some(events.clone());

        Ok(Box::new(MockHandle {
            state: Arc::clone(&self.state),
            events,
        }))
    }
}

struct MockHandle {
    state: Arc<Mutex<MockState>>,
    events: TransportEventSink,
}

#[async_trait]
impl TransportHandle for MockHandle {
    async fn send(&mut self, frame: WsMessage) -> Result<()> {
        let responder = {
            let mut state = self.state.lock();
            state.sent.push(frame.clone());
            state.responder.clone()
        };
        if let Some(responder) = responder {
            for reply in responder(&frame) {
                let _ = self.events.send(TransportEvent::Frame(reply));
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Responder acknowledging subscribes, and auth when the key is "good"
pub fn exchange_responder(frame: &WsMessage) -> Vec<WsMessage> {
    let Some(value) = frame.json() else {
        return Vec::new();
    };
    match value["op"].as_str() {
        Some("auth") if value["key"] == "good" => {
            vec![WsMessage::from_json(&json!({"op": "auth_ok", "expires_in": 3600}))]
        }
        Some("auth") => vec![WsMessage::from_json(
            &json!({"op": "auth_error", "reason": "invalid key"}),
        )],
        Some("subscribe") => vec![WsMessage::from_json(
            &json!({"op": "subscribed", "id": value["id"]}),
        )],
        Some("request") => vec![WsMessage::from_json(
            &json!({"req_id": value["req_id"], "result": value["req_id"]}),
        )],
        _ => Vec::new(),
    }
}

/// `exchange_responder` issuing tokens valid for `expires_in` seconds
pub fn expiring_responder(expires_in: i64) -> impl Fn(&WsMessage) -> Vec<WsMessage> + Send + Sync + 'static {
    move |frame: &WsMessage| {
        exchange_responder(frame)
            .into_iter()
            .map(|reply| match reply.json() {
                Some(value) if value["op"] == "auth_ok" => {
                    WsMessage::from_json(&json!({"op": "auth_ok", "expires_in": expires_in}))
                }
                _ => reply,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// JSON test adapter
// ---------------------------------------------------------------------------

/// Minimal JSON protocol keyed on an `op` field
#[derive(Debug, Clone, Default)]
pub struct TestAdapter {
    pub require_key: bool,
    /// Shared with clones so a test can inspect the adapter it handed over
    pub disconnects: Arc<AtomicU32>,
    pub dropped_subscribes: Arc<Mutex<Vec<String>>>,
}

impl TestAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requiring_key() -> Self {
        Self {
            require_key: true,
            ..Self::default()
        }
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> Vec<String> {
        self.dropped_subscribes.lock().clone()
    }
}

impl ConnectionHandler for TestAdapter {
    fn connection_params(&self) -> ConnectionParams {
        ConnectionParams::new("mock.exchange", 443, "/ws", true)
    }

    fn heartbeat_message(&self) -> Option<WsMessage> {
        Some(WsMessage::from_json(&json!({"op": "ping"})))
    }

    fn on_disconnected(&self, _reason: &str) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

impl AuthHandler for TestAdapter {
    fn required_credentials(&self) -> &[&'static str] {
        if self.require_key {
            &["api_key"]
        } else {
            &[]
        }
    }

    fn generate_auth_payload(&self, credentials: &Credentials) -> Result<WsMessage> {
        Ok(WsMessage::from_json(&json!({
            "op": "auth",
            "key": credentials.get("api_key").unwrap_or_default(),
        })))
    }

    fn classify_auth_response(&self, frame: &WsMessage) -> AuthResponse {
        let Some(value) = frame.json() else {
            return AuthResponse::Unrelated;
        };
        match value["op"].as_str() {
            Some("auth_ok") => AuthResponse::Success {
                expiry: value["expires_in"]
                    .as_i64()
                    .map_or(AuthExpiry::Never, AuthExpiry::In),
                tokens: Default::default(),
            },
            Some("auth_error") => AuthResponse::Failure {
                reason: value["reason"].as_str().unwrap_or("unknown").to_string(),
            },
            _ => AuthResponse::Unrelated,
        }
    }
}

impl SubscriptionHandler for TestAdapter {
    fn encode_subscribe(&self, channel: &str, _params: &Value, id: &str) -> Result<WsMessage> {
        Ok(WsMessage::from_json(
            &json!({"op": "subscribe", "channel": channel, "id": id}),
        ))
    }

    fn encode_unsubscribe(&self, channel: &str, id: &str) -> Result<Option<WsMessage>> {
        Ok(Some(WsMessage::from_json(
            &json!({"op": "unsubscribe", "channel": channel, "id": id}),
        )))
    }

    fn on_subscribe_dropped(&self, id: &str) {
        self.dropped_subscribes.lock().push(id.to_string());
    }

    fn classify_subscription_response(&self, frame: &WsMessage) -> SubscriptionResponse {
        let Some(value) = frame.json() else {
            return SubscriptionResponse::Unrelated;
        };
        let key = match value["id"].as_str() {
            Some(id) => SubscriptionKey::Id(id.to_string()),
            None => return SubscriptionResponse::Unrelated,
        };
        match value["op"].as_str() {
            Some("subscribed") => SubscriptionResponse::Confirmed(key),
            Some("subscribe_error") => SubscriptionResponse::Failed {
                key,
                reason: value["reason"].as_str().unwrap_or("rejected").to_string(),
            },
            _ => SubscriptionResponse::Unrelated,
        }
    }
}

impl MessageHandler for TestAdapter {
    fn classify_inbound(&self, frame: &WsMessage) -> Result<InboundKind> {
        let value = frame
            .json()
            .ok_or_else(|| WsError::Protocol("frame is not JSON".to_string()))?;
        Ok(match value["op"].as_str() {
            Some("auth_ok") | Some("auth_error") => InboundKind::Auth,
            Some("subscribed") | Some("subscribe_error") => InboundKind::Subscription,
            Some("heartbeat") => InboundKind::Heartbeat {
                reply: Some(WsMessage::from_json(&json!({"op": "heartbeat_ack"}))),
            },
            _ => InboundKind::Application,
        })
    }

    fn encode_outbound(&self, message: &Value) -> Result<WsMessage> {
        Ok(WsMessage::from_json(message))
    }

    fn response_matcher(&self, frame: &WsMessage) -> Option<ResponseMatcher> {
        let req_id = frame.json()?.get("req_id")?.clone();
        Some(Arc::new(move |inbound: &WsMessage| {
            inbound
                .json()
                .map_or(false, |value| value.get("req_id") == Some(&req_id) && value.get("op").is_none())
        }))
    }
}

impl ErrorHandler for TestAdapter {}

impl RateLimitHandler for TestAdapter {}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Options with short timers so lifecycle tests finish quickly
pub fn fast_options() -> ConnectionOptions {
    ConnectionOptions {
        timeout_ms: 1000,
        base_backoff_ms: 10,
        max_backoff_ms: 20,
        jitter: 0.0,
        housekeeping_interval_ms: 10,
        ..ConnectionOptions::default()
    }
}

pub fn good_credentials() -> Credentials {
    Credentials::new().with("api_key", "good")
}

/// Poll the event channel until `predicate` matches, collecting everything seen
pub async fn wait_for_event(
    connection: &Connection,
    timeout: Duration,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> (Option<ClientEvent>, Vec<ClientEvent>) {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        while let Some(event) = connection.try_recv_event() {
            verbose_println!("  event: {:?}", event);
            if predicate(&event) {
                return (Some(event), seen);
            }
            seen.push(event);
        }
        if tokio::time::Instant::now() >= deadline {
            return (None, seen);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll `condition` until it holds or the timeout passes
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// Real WebSocket server
// ---------------------------------------------------------------------------

/// A simple mock WebSocket server for testing
pub struct MockWsServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl MockWsServer {
    /// Create and start a new echo server
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let shutdown = shutdown_clone.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, shutdown).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_clone.notified() => {
                        break;
                    }
                }
            }
        });

        Self { addr, shutdown }
    }

    async fn handle_connection(stream: tokio::net::TcpStream, shutdown: Arc<Notify>) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::accept_async;
        use tokio_tungstenite::tungstenite::Message;

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            if msg.is_text() || msg.is_binary() {
                                if write.send(msg).await.is_err() {
                                    break;
                                }
                            } else if msg.is_ping() {
                                if write.send(Message::Pong(msg.into_data())).await.is_err() {
                                    break;
                                }
                            } else if msg.is_close() {
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
