//! Common test utilities for Deribit adapter integration tests
//!
//! `SimulatedDeribit` is an in-memory transport that answers JSON-RPC
//! requests the way the exchange does, so the adapter can be driven through
//! a real `Connection` without network access.

#![allow(dead_code)]

use async_trait::async_trait;
use deribit::auth::{CLIENT_ID, CLIENT_SECRET};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wsflow::{
    ClientEvent, Connection, ConnectionInfo, ConnectionOptions, ConnectionParams, Credentials,
    Result, Transport, TransportEvent, TransportEventSink, TransportHandle, WsMessage,
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

pub const GOOD_CLIENT: &str = "good-client";

#[derive(Default)]
struct ExchangeState {
    sent: Vec<Value>,
    connects: u32,
    urls: Vec<String>,
    sink: Option<TransportEventSink>,
}

#[derive(Clone, Default)]
pub struct SimulatedDeribit {
    state: Arc<Mutex<ExchangeState>>,
}

impl SimulatedDeribit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_count(&self) -> u32 {
        self.state.lock().connects
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().urls.clone()
    }

    /// Requests received, in order
    pub fn sent(&self) -> Vec<Value> {
        self.state.lock().sent.clone()
    }

    pub fn sent_methods(&self, method: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|request| request["method"] == method)
            .collect()
    }

    /// Drop the socket from the exchange side
    pub fn disconnect(&self, reason: &str) {
        if let Some(sink) = self.state.lock().sink.take() {
            let _ = sink.send(TransportEvent::Disconnected(reason.to_string()));
        }
    }

    pub fn push(&self, notification: Value) {
        if let Some(sink) = &self.state.lock().sink {
            let _ = sink.send(TransportEvent::Frame(WsMessage::from_json(&notification)));
        }
    }
}

/// Exchange-side answer to one JSON-RPC request
pub fn respond(request: &Value) -> Option<Value> {
    let id = request["id"].clone();
    let params = &request["params"];

    let reply = match request["method"].as_str()? {
        "public/auth" if params["client_id"] == GOOD_CLIENT => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": 900,
                "scope": "connection",
                "token_type": "bearer"
            }
        }),
        "public/auth" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": 13004, "message": "invalid_credentials"}
        }),
        "public/subscribe" | "private/subscribe" | "public/unsubscribe" | "private/unsubscribe" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": params["channels"].clone()
        }),
        "public/test" => json!({"jsonrpc": "2.0", "id": id, "result": {"version": "1.2.26"}}),
        "public/get_time" => json!({"jsonrpc": "2.0", "id": id, "result": 1_700_000_000_000u64}),
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "Method not found"}
        }),
    };
    Some(reply)
}

#[async_trait]
impl Transport for SimulatedDeribit {
    async fn connect(
        &self,
        params: &ConnectionParams,
        events: TransportEventSink,
    ) -> Result<Box<dyn TransportHandle>> {
        let mut state = self.state.lock();
        state.connects += 1;
        state.urls.push(params.url());

        let _ = events.send(TransportEvent::Connected(ConnectionInfo {
            url: params.url(),
            protocol: None,
        }));
        state.sink = Some(events.clone());

        Ok(Box::new(SimulatedSocket {
            state: Arc::clone(&self.state),
            events,
        }))
    }
}

struct SimulatedSocket {
    state: Arc<Mutex<ExchangeState>>,
    events: TransportEventSink,
}

#[async_trait]
impl TransportHandle for SimulatedSocket {
    async fn send(&mut self, frame: WsMessage) -> Result<()> {
        let Some(request) = frame.json() else {
            return Ok(());
        };
        self.state.lock().sent.push(request.clone());

        if let Some(reply) = respond(&request) {
            let _ = self.events.send(TransportEvent::Frame(WsMessage::from_json(&reply)));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn credentials(client_id: &str) -> Credentials {
    Credentials::new()
        .with(CLIENT_ID, client_id)
        .with(CLIENT_SECRET, "secret")
}

/// Deribit defaults with short timers
pub fn fast_options() -> ConnectionOptions {
    ConnectionOptions {
        timeout_ms: 1000,
        base_backoff_ms: 10,
        max_backoff_ms: 20,
        jitter: 0.0,
        housekeeping_interval_ms: 10,
        heartbeat_interval_ms: None,
        ..deribit::default_options()
    }
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
