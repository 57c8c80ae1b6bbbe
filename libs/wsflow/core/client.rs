use crate::auth::Credentials;
use crate::auth_flow::AuthStatus;
use crate::error::{Result, WsError};
use crate::message::WsMessage;
use crate::router::ResponseMatcher;
use crate::status::{AtomicConnectionStatus, AtomicMetrics, ConnectionStatus};
use crate::subscriptions::SubscriptionRecord;
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lifecycle events published by a connection
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Transport connected
    Connected,
    Authenticated,
    /// Authenticated (if needed) and subscriptions replayed
    Ready,
    Disconnected(String),
    /// Reconnect scheduled (attempt number, 1-based)
    Reconnecting(u32),
    /// Application frame not claimed by a pending request
    Message(WsMessage),
    SubscriptionConfirmed { id: String, channel: String },
    SubscriptionFailed { id: String, channel: String, reason: String },
    SubscriptionTimedOut { id: String },
    /// Non-fatal error, e.g. an undecodable frame
    Error(WsError),
    /// Terminal: reconnects exhausted, auth failed, or closed by the caller
    Stopped(String),
}

/// Per-message send options
#[derive(Clone, Default)]
pub struct SendOptions {
    /// Wait for the first inbound frame matching this predicate
    pub matcher: Option<ResponseMatcher>,
    /// Ask the adapter for a matcher when none is given
    pub expect_response: bool,
    /// Response timeout, `timeout_ms` by default
    pub timeout: Option<Duration>,
    /// Overrides the adapter's rate limit category
    pub category: Option<String>,
    pub priority: Option<u8>,
    /// Overrides the cost map
    pub cost: Option<u64>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matcher(mut self, matcher: impl Fn(&WsMessage) -> bool + Send + Sync + 'static) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    pub fn expect_response(mut self) -> Self {
        self.expect_response = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn cost(mut self, cost: u64) -> Self {
        self.cost = Some(cost);
        self
    }
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOptions")
            .field("matcher", &self.matcher.is_some())
            .field("expect_response", &self.expect_response)
            .field("timeout", &self.timeout)
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("cost", &self.cost)
            .finish()
    }
}

/// Point-in-time view of a connection
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub last_disconnect_reason: Option<WsError>,
    pub auth_status: AuthStatus,
    pub auth_expires_at: Option<DateTime<Utc>>,
    pub active_subscriptions: usize,
    pub queued_requests: usize,
    pub available_tokens: u64,
    /// No further reconnects will happen without `reconnect()`
    pub terminal: bool,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub reconnect_count: u64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            last_disconnect_reason: None,
            auth_status: AuthStatus::Unauthenticated,
            auth_expires_at: None,
            active_subscriptions: 0,
            queued_requests: 0,
            available_tokens: 0,
            terminal: false,
            messages_sent: 0,
            messages_received: 0,
            reconnect_count: 0,
        }
    }
}

/// State shared between the orchestrator task and its handles
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) status: AtomicConnectionStatus,
    pub(crate) metrics: AtomicMetrics,
    pub(crate) snapshot: RwLock<StatusSnapshot>,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Commands from handles to the orchestrator task
pub(crate) enum Command {
    Connect { reply: Reply<()> },
    Send { message: Value, options: SendOptions, reply: Reply<Option<WsMessage>> },
    Subscribe { channel: String, params: Value, reply: Reply<String> },
    Unsubscribe { id: String, reply: Reply<()> },
    Authenticate { credentials: Credentials, reply: Reply<()> },
    Subscriptions { reply: oneshot::Sender<Vec<SubscriptionRecord>> },
    Reconnect { reply: Reply<()> },
    Close { reply: Reply<()> },
}

/// Handle to one managed connection
///
/// Cheap to clone; every clone talks to the same orchestrator task. The
/// task runs until `close()` is called or every handle is dropped.
///
/// # Example
///
/// ```ignore
/// let connection = wsflow::connect(adapter, ConnectionOptions::default()).await?;
/// let id = connection.subscribe("ticker.BTC-PERPETUAL.100ms", json!({})).await?;
///
/// while let Ok(event) = connection.recv_event() {
///     if let ClientEvent::Message(frame) = event {
///         println!("{:?}", frame);
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Connection {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    events: Receiver<ClientEvent>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Connection {
    pub(crate) fn new(
        name: impl Into<Arc<str>>,
        commands: mpsc::UnboundedSender<Command>,
        shared: Arc<Shared>,
        events: Receiver<ClientEvent>,
    ) -> Self {
        Self {
            name: name.into(),
            commands,
            shared,
            events,
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn attach_task(&self, task: JoinHandle<()>) {
        *self.task.lock() = Some(task);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether both handles drive the same connection task
    pub fn same_connection(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    /// Start connecting and wait until ready or terminally failed
    ///
    /// Returns immediately when already ready.
    pub async fn connect(&self) -> Result<()> {
        self.request_reply(|reply| Command::Connect { reply }).await
    }

    /// Send an application message
    ///
    /// Resolves once the frame is on the wire, or with the matched response
    /// when the options carry a matcher. Fails with `NotReady` unless the
    /// connection is ready and `RateLimited` when the limiter rejects it.
    pub async fn send(&self, message: Value, options: SendOptions) -> Result<Option<WsMessage>> {
        self.request_reply(|reply| Command::Send { message, options, reply }).await
    }

    /// Send and wait for the response the adapter correlates with it
    pub async fn request(&self, message: Value) -> Result<WsMessage> {
        self.send(message, SendOptions::new().expect_response())
            .await?
            .ok_or_else(|| WsError::Protocol("adapter provides no response matcher".to_string()))
    }

    /// Subscribe to a channel and return the subscription id
    ///
    /// The record starts pending; confirmation arrives as
    /// `ClientEvent::SubscriptionConfirmed`.
    pub async fn subscribe(&self, channel: impl Into<String>, params: Value) -> Result<String> {
        let channel = channel.into();
        self.request_reply(|reply| Command::Subscribe { channel, params, reply }).await
    }

    /// Unsubscribe by id; ids issued before a reconnect are still accepted
    pub async fn unsubscribe(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.request_reply(|reply| Command::Unsubscribe { id, reply }).await
    }

    /// Replace the credentials and authenticate if connected
    pub async fn authenticate(&self, credentials: Credentials) -> Result<()> {
        self.request_reply(|reply| Command::Authenticate { credentials, reply }).await
    }

    /// Every subscription record, in creation order
    pub async fn subscriptions(&self) -> Result<Vec<SubscriptionRecord>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Subscriptions { reply })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Restart the lifecycle, leaving a terminal state if necessary
    pub async fn reconnect(&self) -> Result<()> {
        self.request_reply(|reply| Command::Reconnect { reply }).await
    }

    /// Close the connection and wait for its task to finish
    pub async fn close(&self) -> Result<()> {
        info!(connection = %self.name, "Closing connection");
        let result = self.request_reply(|reply| Command::Close { reply }).await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        match result {
            Err(WsError::ChannelClosed(_)) => Ok(()),
            other => other,
        }
    }

    /// Current status snapshot
    pub fn status(&self) -> StatusSnapshot {
        let mut snapshot = self.shared.snapshot.read().clone();
        snapshot.status = self.shared.status.get();
        snapshot.messages_sent = self.shared.metrics.messages_sent();
        snapshot.messages_received = self.shared.metrics.messages_received();
        snapshot.reconnect_count = self.shared.metrics.reconnect_count();
        snapshot
    }

    #[inline]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.status.get()
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.shared.status.is_ready()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ClientEvent> {
        self.events.try_recv().ok()
    }

    /// Receive an event (blocking)
    pub fn recv_event(&self) -> std::result::Result<ClientEvent, crossbeam_channel::RecvError> {
        self.events.recv()
    }

    /// Receive an event, waiting at most `timeout` (blocking)
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<ClientEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Raw event receiver, e.g. for `crossbeam_channel::select!`
    pub fn events(&self) -> &Receiver<ClientEvent> {
        &self.events
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| self.closed())
    }

    async fn request_reply<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.command(build(reply))?;
        match rx.await {
            Ok(result) => result,
            Err(_) => {
                debug!(connection = %self.name, "Reply dropped by connection task");
                Err(self.closed())
            }
        }
    }

    fn closed(&self) -> WsError {
        WsError::ChannelClosed(format!("connection '{}' is closed", self.name))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("status", &self.shared.status.get())
            .finish()
    }
}
