//! Connection orchestrator
//!
//! One task per connection owns the [`ConnectionState`] aggregate and drives
//! the lifecycle:
//!
//! ```text
//! Disconnected → Connecting → Connected ─(credentials)→ Authenticating → Ready
//!      ↑  │                                                  │             │
//!      │  └── connect failed ──┐            auth failed ─────┴─→ terminal  │
//!      │                       ↓                                           │
//!      └──── backoff timer ← should_reconnect? ←──── disconnect ───────────┘
//! ```
//!
//! The task's `select!` loop serves caller commands, transport events, the
//! pending connect attempt, the reconnect timer, the rate limiter's refill
//! wake-up, housekeeping and the optional heartbeat. None of them block one
//! another.
//!
//! A fresh socket reaches `Ready` only once every replayed subscribe has left
//! the rate limiter, so caller traffic never overtakes a resubscription.

use crate::adapter::Adapter;
use crate::auth::Credentials;
use crate::auth_flow::{AuthOutcome, AuthState};
use crate::client::{ClientEvent, Command, Reply, SendOptions, Shared, StatusSnapshot};
use crate::config::ConnectionOptions;
use crate::error::{RateLimitReason, Result, WsError};
use crate::error_handler::{ErrorContext, Phase};
use crate::error_policy::{ErrorDecision, ErrorPolicy, ReconnectDecision};
use crate::message::WsMessage;
use crate::rate_limit::{AUTH_CATEGORY, SUBSCRIBE_CATEGORY};
use crate::rate_limiter::{Admission, RateLimitRequest, RateLimiter, Tick};
use crate::registry::RegistrationGuard;
use crate::router::{InboundKind, ResponseMatcher};
use crate::status::ConnectionStatus;
use crate::subscriptions::{ResponseOutcome, SubscriptionRegistry, SubscriptionStatus};
use crate::transport::{ConnectionInfo, Transport, TransportEvent, TransportHandle};
use crossbeam_channel::Sender;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Box<dyn TransportHandle>>> + Send>>;

/// Work waiting for rate limit admission
pub(crate) enum Outbound {
    Auth {
        frame: WsMessage,
    },
    Subscribe {
        id: String,
        frame: WsMessage,
    },
    Unsubscribe {
        frame: WsMessage,
    },
    Request {
        frame: WsMessage,
        matcher: Option<ResponseMatcher>,
        timeout: Duration,
        reply: Reply<Option<WsMessage>>,
    },
}

struct PendingRequest {
    matcher: ResponseMatcher,
    deadline: Instant,
    reply: Reply<Option<WsMessage>>,
}

/// Root aggregate, owned exclusively by the orchestrator task
pub(crate) struct ConnectionState {
    pub(crate) status: ConnectionStatus,
    /// Reset to 0 only on reaching ready
    pub(crate) reconnect_attempts: u32,
    pub(crate) last_disconnect_reason: Option<WsError>,
    /// Only mutated by the caller or to merge rotated tokens
    pub(crate) credentials: Option<Credentials>,
    pub(crate) auth: AuthState,
    pub(crate) limiter: RateLimiter<Outbound>,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) terminal: bool,
}

impl ConnectionState {
    pub(crate) fn new(options: &ConnectionOptions) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            last_disconnect_reason: None,
            credentials: options.credentials.clone(),
            auth: AuthState::new(options.auth_refresh_threshold_s),
            limiter: RateLimiter::new(&options.rate_limit),
            subscriptions: SubscriptionRegistry::new(),
            terminal: false,
        }
    }

    fn has_credentials(&self) -> bool {
        self.credentials.as_ref().map_or(false, |credentials| !credentials.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub(crate) struct Orchestrator<A: Adapter> {
    name: Arc<str>,
    adapter: Arc<A>,
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
    policy: ErrorPolicy,
    state: ConnectionState,
    shared: Arc<Shared>,
    events: Sender<ClientEvent>,
    commands: UnboundedReceiver<Command>,

    socket: Option<Box<dyn TransportHandle>>,
    socket_info: Option<ConnectionInfo>,
    /// Set when a write fails; handled as a disconnect at the end of the iteration
    socket_error: Option<WsError>,
    transport_events: Option<UnboundedReceiver<TransportEvent>>,
    connecting: Option<ConnectFuture>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    /// Fires when the next token is due while the limiter holds work
    limiter_wake: Option<Pin<Box<Sleep>>>,
    /// A fresh socket replays subscriptions when it reaches ready
    replay_on_ready: bool,
    /// Ready is held until the replayed subscribes are written
    awaiting_replay: bool,
    auth_deadline: Option<Instant>,

    pending: Vec<PendingRequest>,
    ready_waiters: Vec<Reply<()>>,
    auth_waiters: Vec<Reply<()>>,
    /// Deregisters the connection when the task exits
    _registration: Option<RegistrationGuard>,
}

impl<A: Adapter> Orchestrator<A> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: Arc<str>,
        adapter: Arc<A>,
        transport: Arc<dyn Transport>,
        options: ConnectionOptions,
        policy: ErrorPolicy,
        shared: Arc<Shared>,
        events: Sender<ClientEvent>,
        commands: UnboundedReceiver<Command>,
    ) -> Self {
        let state = ConnectionState::new(&options);
        Self {
            name,
            adapter,
            transport,
            options,
            policy,
            state,
            shared,
            events,
            commands,
            socket: None,
            socket_info: None,
            socket_error: None,
            transport_events: None,
            connecting: None,
            reconnect_timer: None,
            limiter_wake: None,
            replay_on_ready: false,
            awaiting_replay: false,
            auth_deadline: None,
            pending: Vec::new(),
            ready_waiters: Vec::new(),
            auth_waiters: Vec::new(),
            _registration: None,
        }
    }

    pub(crate) fn with_registration(mut self, guard: Option<RegistrationGuard>) -> Self {
        self._registration = guard;
        self
    }

    /// Main task loop
    pub(crate) async fn run(mut self) {
        let mut housekeeping = tokio::time::interval(self.options.housekeeping_interval());
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = self.options.heartbeat_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        self.publish();

        loop {
            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!(connection = %self.name, "All handles dropped");
                        self.shutdown("all handles dropped").await;
                        Flow::Exit
                    }
                },
                event = recv_opt(&mut self.transport_events) => {
                    match event {
                        Some(event) => self.handle_transport_event(event).await,
                        None => self.transport_events = None,
                    }
                    Flow::Continue
                },
                result = poll_opt(&mut self.connecting) => {
                    self.connecting = None;
                    self.handle_connect_result(result).await;
                    Flow::Continue
                },
                _ = sleep_opt(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.start_connect();
                    Flow::Continue
                },
                _ = sleep_opt(&mut self.limiter_wake) => {
                    self.limiter_wake = None;
                    self.release_queued().await;
                    self.complete_replay().await;
                    Flow::Continue
                },
                _ = housekeeping.tick() => {
                    self.housekeeping().await;
                    Flow::Continue
                },
                _ = tick_opt(&mut heartbeat) => {
                    self.send_heartbeat().await;
                    Flow::Continue
                },
            };

            if let Some(error) = self.socket_error.take() {
                self.on_disconnect(error).await;
            }
            self.schedule_limiter_wake();
            self.publish();

            if flow == Flow::Exit {
                break;
            }
        }

        info!(connection = %self.name, "Connection task exiting");
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Connect { reply } => {
                if self.state.status == ConnectionStatus::Ready {
                    let _ = reply.send(Ok(()));
                    return Flow::Continue;
                }
                self.ready_waiters.push(reply);
                if self.is_idle() {
                    self.state.reconnect_attempts = 0;
                    self.state.terminal = false;
                    self.start_connect();
                }
            }
            Command::Send { message, options, reply } => self.handle_send(message, options, reply).await,
            Command::Subscribe { channel, params, reply } => {
                let result = self.handle_subscribe(&channel, params).await;
                let _ = reply.send(result);
            }
            Command::Unsubscribe { id, reply } => {
                let result = self.handle_unsubscribe(&id).await;
                let _ = reply.send(result);
            }
            Command::Authenticate { credentials, reply } => self.handle_authenticate(credentials, reply).await,
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.state.subscriptions.iter().cloned().collect());
            }
            Command::Reconnect { reply } => {
                info!(connection = %self.name, "Manual reconnect requested");
                self.close_socket().await;
                self.reset_socket_state(WsError::ConnectionClosed("manual reconnect".to_string()));
                self.adapter.on_disconnected("manual reconnect");
                self.state.reconnect_attempts = 0;
                self.state.terminal = false;
                self.reconnect_timer = None;
                self.start_connect();
                let _ = reply.send(Ok(()));
            }
            Command::Close { reply } => {
                self.shutdown("closed by caller").await;
                let _ = reply.send(Ok(()));
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    async fn handle_send(&mut self, message: Value, options: SendOptions, reply: Reply<Option<WsMessage>>) {
        if let Err(e) = self.ensure_ready() {
            let _ = reply.send(Err(e));
            return;
        }

        let frame = match self.adapter.encode_outbound(&message) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let matcher = match options.matcher {
            Some(matcher) => Some(matcher),
            None if options.expect_response => self.adapter.response_matcher(&frame),
            None => None,
        };

        let mut request = RateLimitRequest::new(
            options.category.unwrap_or_else(|| self.adapter.category(&message)),
            Outbound::Request {
                frame,
                matcher,
                timeout: options.timeout.unwrap_or_else(|| self.options.timeout()),
                reply,
            },
        )
        .priority(options.priority.unwrap_or_else(|| self.adapter.priority(&message)));
        request.cost = options.cost;

        if let Err((outbound, reason)) = self.submit(request).await {
            if let Outbound::Request { reply, .. } = outbound {
                let _ = reply.send(Err(WsError::RateLimited(reason)));
            }
        }
    }

    async fn handle_subscribe(&mut self, channel: &str, params: Value) -> Result<String> {
        self.ensure_ready()?;

        let id = self.state.subscriptions.subscribe(channel, params.clone());
        let frame = match self.adapter.encode_subscribe(channel, &params, &id) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = self.state.subscriptions.mark_failed(&id, &e.to_string());
                self.adapter.on_subscribe_dropped(&id);
                return Err(e);
            }
        };

        debug!(connection = %self.name, channel, id = %id, "Subscribing");
        self.submit_subscribe(id.clone(), channel, frame).await?;
        Ok(id)
    }

    async fn handle_unsubscribe(&mut self, id: &str) -> Result<()> {
        let record = self
            .state
            .subscriptions
            .resolve(id)
            .ok_or_else(|| WsError::NotFound(id.to_string()))?;
        if record.status == SubscriptionStatus::Unsubscribed {
            return Ok(());
        }
        let (current_id, channel) = (record.id.clone(), record.channel.clone());

        if self.state.status == ConnectionStatus::Ready {
            if let Some(frame) = self.adapter.encode_unsubscribe(&channel, &current_id)? {
                let request = RateLimitRequest::new(SUBSCRIBE_CATEGORY, Outbound::Unsubscribe { frame });
                if let Err((_, reason)) = self.submit(request).await {
                    return Err(WsError::RateLimited(reason));
                }
            }
        }

        debug!(connection = %self.name, channel = %channel, id = %current_id, "Unsubscribed");
        self.state.subscriptions.unsubscribe(&current_id)
    }

    async fn handle_authenticate(&mut self, credentials: Credentials, reply: Reply<()>) {
        self.state.credentials = Some(credentials);

        match self.state.status {
            ConnectionStatus::Connected | ConnectionStatus::Ready => {
                self.auth_waiters.push(reply);
                self.begin_auth(true).await;
            }
            ConnectionStatus::Authenticating => self.auth_waiters.push(reply),
            // Used on the next connect
            _ => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state.status == ConnectionStatus::Ready {
            Ok(())
        } else {
            Err(WsError::NotReady(self.state.status.to_string()))
        }
    }

    // ---------------------------------------------------------------------
    // Connect / disconnect
    // ---------------------------------------------------------------------

    /// Nothing in flight: no socket, no connect attempt, no timer
    fn is_idle(&self) -> bool {
        self.state.status == ConnectionStatus::Disconnected
            && self.connecting.is_none()
            && self.reconnect_timer.is_none()
    }

    fn start_connect(&mut self) {
        let mut params = self.options.connection_params(self.adapter.connection_params());
        params.headers.extend(self.adapter.headers());

        info!(
            connection = %self.name,
            attempt = self.state.reconnect_attempts,
            "Connecting to {}",
            params.url()
        );
        self.set_status(ConnectionStatus::Connecting);

        let (sink, events) = mpsc::unbounded_channel();
        self.transport_events = Some(events);
        self.socket = None;
        self.socket_info = None;

        let transport = Arc::clone(&self.transport);
        self.connecting = Some(Box::pin(async move { transport.connect(&params, sink).await }));
    }

    async fn handle_connect_result(&mut self, result: Result<Box<dyn TransportHandle>>) {
        match result {
            Ok(socket) => {
                self.socket = Some(socket);
                self.on_socket_established().await;
            }
            Err(e) => {
                warn!(connection = %self.name, "Connect failed: {}", e);
                self.on_disconnect(e).await;
            }
        }
    }

    /// Connected once both the handle and the `Connected` event have arrived
    async fn on_socket_established(&mut self) {
        if self.state.status != ConnectionStatus::Connecting || self.socket.is_none() || self.socket_info.is_none() {
            return;
        }

        if let Some(info) = &self.socket_info {
            info!(connection = %self.name, url = %info.url, "Connected");
        }
        self.set_status(ConnectionStatus::Connected);
        self.replay_on_ready = true;
        self.adapter.on_connected();
        self.emit(ClientEvent::Connected);

        if self.state.has_credentials() {
            self.begin_auth(true).await;
        } else {
            self.enter_ready().await;
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(info) => {
                self.socket_info = Some(info);
                self.on_socket_established().await;
            }
            TransportEvent::Frame(frame) => self.handle_frame(frame).await,
            TransportEvent::Disconnected(reason) => {
                self.on_disconnect(WsError::ConnectionClosed(reason)).await;
            }
            TransportEvent::Timeout => {
                self.on_disconnect(WsError::Timeout("transport timeout".to_string())).await;
            }
        }
    }

    /// Disconnect path shared by every connection-level failure
    async fn on_disconnect(&mut self, error: WsError) {
        if self.state.status == ConnectionStatus::Disconnected && self.socket.is_none() {
            return;
        }

        let phase = self.phase();
        self.close_socket().await;
        self.reset_socket_state(error.clone());

        let reason = error.to_string();
        self.adapter.on_disconnected(&reason);
        self.emit(ClientEvent::Disconnected(reason));

        let context = self.error_context(phase);
        match self.policy.should_reconnect(self.adapter.as_ref(), &error, &context) {
            ReconnectDecision::Reconnect { delay } => {
                self.state.reconnect_attempts += 1;
                self.shared.metrics.increment_reconnects();
                info!(
                    connection = %self.name,
                    attempt = self.state.reconnect_attempts,
                    "Reconnecting in {:?}",
                    delay
                );
                self.emit(ClientEvent::Reconnecting(self.state.reconnect_attempts));
                self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            ReconnectDecision::Abandon { reason } => {
                let terminal_error = if error.is_auth() {
                    error
                } else {
                    WsError::ReconnectionFailed {
                        attempts: self.state.reconnect_attempts,
                        reason: error.to_string(),
                    }
                };
                self.terminate(terminal_error, reason);
            }
        }
    }

    /// Tear down per-socket state after the socket is gone
    fn reset_socket_state(&mut self, error: WsError) {
        self.transport_events = None;
        self.connecting = None;
        self.socket_info = None;
        self.auth_deadline = None;
        self.limiter_wake = None;
        self.awaiting_replay = false;
        self.set_status(ConnectionStatus::Disconnected);
        self.state.last_disconnect_reason = Some(error.clone());
        self.state.auth.reset();

        let closed = WsError::ConnectionClosed(error.to_string());
        for request in self.pending.drain(..) {
            let _ = request.reply.send(Err(closed.clone()));
        }
        // Queued subscribes stay pending in the registry and are replayed
        for outbound in self.state.limiter.drain() {
            match outbound {
                Outbound::Request { reply, .. } => {
                    let _ = reply.send(Err(closed.clone()));
                }
                Outbound::Subscribe { id, .. } => self.adapter.on_subscribe_dropped(&id),
                Outbound::Auth { .. } | Outbound::Unsubscribe { .. } => {}
            }
        }
        for waiter in self.auth_waiters.drain(..) {
            let _ = waiter.send(Err(closed.clone()));
        }
    }

    fn terminate(&mut self, error: WsError, reason: String) {
        error!(connection = %self.name, "Connection stopped: {}", reason);
        self.state.terminal = true;
        self.state.last_disconnect_reason = Some(error.clone());
        self.reconnect_timer = None;
        self.publish();
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        self.emit(ClientEvent::Stopped(reason));
    }

    async fn close_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close().await {
                debug!(connection = %self.name, "Error closing socket: {}", e);
            }
        }
    }

    /// Close for good; cancels a pending reconnect timer
    async fn shutdown(&mut self, reason: &str) {
        self.set_status(ConnectionStatus::Closing);
        self.reconnect_timer = None;
        self.close_socket().await;
        self.reset_socket_state(WsError::ConnectionClosed(reason.to_string()));
        self.terminate(WsError::ConnectionClosed(reason.to_string()), reason.to_string());
    }

    // ---------------------------------------------------------------------
    // Authentication and ready
    // ---------------------------------------------------------------------

    /// Send the auth payload; `gate` holds general traffic until it succeeds
    async fn begin_auth(&mut self, gate: bool) {
        let frame = match self
            .state
            .auth
            .generate_auth_data(self.adapter.as_ref(), self.state.credentials.as_ref())
        {
            Ok(frame) => frame,
            Err(e) => {
                self.fail_connection(e).await;
                return;
            }
        };

        if gate {
            self.set_status(ConnectionStatus::Authenticating);
        }
        self.auth_deadline = Some(Instant::now() + self.options.timeout());
        debug!(connection = %self.name, "Authenticating");

        let request = RateLimitRequest::new(AUTH_CATEGORY, Outbound::Auth { frame }).priority(u8::MAX);
        if let Err((_, reason)) = self.submit(request).await {
            self.fail_connection(WsError::RateLimited(reason)).await;
        }
    }

    async fn handle_auth_outcome(&mut self, outcome: AuthOutcome) {
        match outcome {
            AuthOutcome::Unrelated => {}
            AuthOutcome::Authenticated { expires_at, tokens } => {
                info!(connection = %self.name, expires_at = ?expires_at, "Authenticated");
                self.auth_deadline = None;
                if !tokens.is_empty() {
                    self.state
                        .credentials
                        .get_or_insert_with(Credentials::new)
                        .merge(tokens);
                }
                self.emit(ClientEvent::Authenticated);
                for waiter in self.auth_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                if self.state.status == ConnectionStatus::Authenticating {
                    self.enter_ready().await;
                }
            }
            AuthOutcome::Failed(reason) => {
                let error = WsError::Auth(reason);
                for waiter in self.auth_waiters.drain(..) {
                    let _ = waiter.send(Err(error.clone()));
                }
                self.fail_connection(error).await;
            }
        }
    }

    /// Actively drop the socket, then run the disconnect path
    async fn fail_connection(&mut self, error: WsError) {
        self.close_socket().await;
        self.on_disconnect(error).await;
    }

    async fn enter_ready(&mut self) {
        self.auth_deadline = None;

        if std::mem::take(&mut self.replay_on_ready) {
            self.replay_subscriptions().await;
        }
        if self.replay_queued() {
            debug!(
                connection = %self.name,
                queued = self.state.limiter.queue_len(),
                "Ready deferred until replayed subscriptions are sent"
            );
            self.awaiting_replay = true;
            self.set_status(ConnectionStatus::Connected);
            return;
        }

        self.awaiting_replay = false;
        self.state.reconnect_attempts = 0;
        self.set_status(ConnectionStatus::Ready);

        info!(connection = %self.name, "Ready");
        self.emit(ClientEvent::Ready);
        // Callers woken below must observe the ready snapshot
        self.publish();
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Re-issue every pending or confirmed subscription under a fresh id
    async fn replay_subscriptions(&mut self) {
        let replayable = self.state.subscriptions.replayable();
        if replayable.is_empty() {
            return;
        }
        info!(connection = %self.name, count = replayable.len(), "Replaying subscriptions");

        for old_id in replayable {
            let new_id = match self.state.subscriptions.replay_at(&old_id, chrono::Utc::now()) {
                Ok(id) => id,
                Err(e) => {
                    warn!(connection = %self.name, "Cannot replay {}: {}", old_id, e);
                    continue;
                }
            };
            let Some(record) = self.state.subscriptions.get(&new_id) else {
                continue;
            };
            let (channel, params) = (record.channel.clone(), record.params.clone());

            match self.adapter.encode_subscribe(&channel, &params, &new_id) {
                Ok(frame) => {
                    debug!(connection = %self.name, channel = %channel, old = %old_id, new = %new_id, "Resubscribing");
                    let _ = self.submit_subscribe(new_id, &channel, frame).await;
                }
                Err(e) => {
                    let _ = self.state.subscriptions.mark_failed(&new_id, &e.to_string());
                    self.emit(ClientEvent::SubscriptionFailed {
                        id: new_id,
                        channel,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// A replayed subscribe still waits in the limiter
    fn replay_queued(&self) -> bool {
        self.state
            .limiter
            .queued()
            .any(|outbound| matches!(outbound, Outbound::Subscribe { .. }))
    }

    /// Finish a deferred ready once the replay has drained
    async fn complete_replay(&mut self) {
        if self.awaiting_replay && self.socket.is_some() && !self.replay_queued() {
            self.enter_ready().await;
        }
    }

    async fn submit_subscribe(&mut self, id: String, channel: &str, frame: WsMessage) -> Result<()> {
        let request = RateLimitRequest::new(SUBSCRIBE_CATEGORY, Outbound::Subscribe { id, frame });
        match self.submit(request).await {
            Ok(()) => Ok(()),
            Err((outbound, reason)) => {
                if let Outbound::Subscribe { id, .. } = outbound {
                    warn!(connection = %self.name, channel, id = %id, "Subscribe rejected: {}", reason);
                    let _ = self.state.subscriptions.mark_failed(&id, &reason.to_string());
                    self.adapter.on_subscribe_dropped(&id);
                    self.emit(ClientEvent::SubscriptionFailed {
                        id,
                        channel: channel.to_string(),
                        reason: reason.to_string(),
                    });
                }
                Err(WsError::RateLimited(reason))
            }
        }
    }

    // ---------------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------------

    /// Admit through the limiter; hands a rejected request back to the caller
    async fn submit(
        &mut self,
        request: RateLimitRequest<Outbound>,
    ) -> std::result::Result<(), (Outbound, RateLimitReason)> {
        // Earlier admissions go first once their tokens are back
        self.release_queued().await;

        match self.state.limiter.admit(request) {
            Admission::Allow(outbound) => {
                self.dispatch(outbound).await;
                Ok(())
            }
            Admission::Queue => {
                debug!(
                    connection = %self.name,
                    queued = self.state.limiter.queue_len(),
                    "Request queued by rate limiter"
                );
                Ok(())
            }
            Admission::Reject(outbound, reason) => Err((outbound, reason)),
        }
    }

    async fn dispatch(&mut self, outbound: Outbound) {
        match outbound {
            Outbound::Auth { frame } | Outbound::Unsubscribe { frame } => {
                let _ = self.write(frame).await;
            }
            Outbound::Subscribe { id, frame } => {
                // Unsubscribed while queued
                let still_pending = self
                    .state
                    .subscriptions
                    .get(&id)
                    .map_or(false, |record| record.status == SubscriptionStatus::Pending);
                if still_pending {
                    let _ = self.write(frame).await;
                } else {
                    self.adapter.on_subscribe_dropped(&id);
                }
            }
            Outbound::Request {
                frame,
                matcher,
                timeout,
                reply,
            } => match self.write(frame).await {
                Ok(()) => match matcher {
                    Some(matcher) => self.pending.push(PendingRequest {
                        matcher,
                        deadline: Instant::now() + timeout,
                        reply,
                    }),
                    None => {
                        let _ = reply.send(Ok(None));
                    }
                },
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
        }
    }

    /// Dispatch whatever the limiter can release now
    async fn release_queued(&mut self) {
        if self.socket.is_none() {
            return;
        }
        while let Tick::Process(outbound) = self.state.limiter.tick() {
            self.dispatch(outbound).await;
        }
    }

    /// Arm the wake-up for the next refill, or disarm it when nothing waits
    fn schedule_limiter_wake(&mut self) {
        let due = match self.state.limiter.next_refill_at() {
            Some(due) if self.socket.is_some() => Instant::from_std(due),
            _ => {
                self.limiter_wake = None;
                return;
            }
        };
        match self.limiter_wake.as_mut() {
            Some(wake) if wake.deadline() == due => {}
            Some(wake) => wake.as_mut().reset(due),
            None => self.limiter_wake = Some(Box::pin(tokio::time::sleep_until(due))),
        }
    }

    /// Write one frame to the socket, bypassing the limiter
    async fn write(&mut self, frame: WsMessage) -> Result<()> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(WsError::ConnectionClosed("not connected".to_string()));
        };

        match socket.send(frame).await {
            Ok(()) => {
                self.shared.metrics.increment_sent();
                Ok(())
            }
            Err(e) => {
                warn!(connection = %self.name, "Send failed: {}", e);
                if self.socket_error.is_none() {
                    self.socket_error = Some(e.clone());
                }
                Err(e)
            }
        }
    }

    async fn send_heartbeat(&mut self) {
        if !self.state.status.has_transport() {
            return;
        }
        if let Some(frame) = self.adapter.heartbeat_message() {
            debug!(connection = %self.name, "Sending heartbeat");
            let _ = self.write(frame).await;
        }
    }

    // ---------------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------------

    async fn handle_frame(&mut self, frame: WsMessage) {
        self.shared.metrics.increment_received();

        match &frame {
            WsMessage::Ping(payload) => {
                let _ = self.write(WsMessage::Pong(payload.clone())).await;
                return;
            }
            WsMessage::Pong(_) => return,
            WsMessage::Close(reason) => {
                debug!(connection = %self.name, "Close frame received: {:?}", reason);
                return;
            }
            WsMessage::Text(_) | WsMessage::Binary(_) => {}
        }

        if self.auth_deadline.is_some() {
            let outcome = self
                .state
                .auth
                .handle_auth_response(self.adapter.as_ref(), &frame);
            if outcome != AuthOutcome::Unrelated {
                self.handle_auth_outcome(outcome).await;
                return;
            }
        }

        match self.adapter.classify_inbound(&frame) {
            Ok(InboundKind::Auth) => {
                debug!(connection = %self.name, "Auth frame with no authentication in flight");
            }
            Ok(InboundKind::Subscription) => self.handle_subscription_frame(&frame),
            Ok(InboundKind::Heartbeat { reply }) => {
                if let Some(reply) = reply {
                    let _ = self.write(reply).await;
                }
            }
            Ok(InboundKind::Application) => self.route_application(frame),
            Ok(InboundKind::Ignore) => {}
            Err(e) => {
                let context = self.error_context(Phase::Receive);
                match self.policy.handle_error(self.adapter.as_ref(), &e, &context) {
                    ErrorDecision::Continue => self.emit(ClientEvent::Error(e)),
                    ErrorDecision::Retry(_) => self.socket_error = Some(e),
                    ErrorDecision::Stop(_) => {
                        self.fail_connection(e).await;
                    }
                }
            }
        }
    }

    fn handle_subscription_frame(&mut self, frame: &WsMessage) {
        let response = self.adapter.classify_subscription_response(frame);
        match self.state.subscriptions.handle_response(&response) {
            ResponseOutcome::Confirmed { id, channel } => {
                debug!(connection = %self.name, channel = %channel, id = %id, "Subscription confirmed");
                self.emit(ClientEvent::SubscriptionConfirmed { id, channel });
            }
            ResponseOutcome::Failed { id, channel, reason } => {
                warn!(connection = %self.name, channel = %channel, id = %id, "Subscription failed: {}", reason);
                self.emit(ClientEvent::SubscriptionFailed { id, channel, reason });
            }
            ResponseOutcome::Unchanged => {}
        }
    }

    /// Hand the frame to the first matching pending request, else publish it
    fn route_application(&mut self, frame: WsMessage) {
        if let Some(index) = self.pending.iter().position(|request| (request.matcher)(&frame)) {
            let request = self.pending.remove(index);
            let _ = request.reply.send(Ok(Some(frame)));
            return;
        }
        self.emit(ClientEvent::Message(frame));
    }

    // ---------------------------------------------------------------------
    // Housekeeping
    // ---------------------------------------------------------------------

    async fn housekeeping(&mut self) {
        let now = Instant::now();

        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].deadline <= now {
                let request = self.pending.remove(index);
                let _ = request
                    .reply
                    .send(Err(WsError::Timeout("no response within the request timeout".to_string())));
            } else {
                index += 1;
            }
        }

        if matches!(self.auth_deadline, Some(deadline) if deadline <= now) {
            self.fail_connection(WsError::Timeout("authentication response".to_string()))
                .await;
            return;
        }

        let expired = self
            .state
            .subscriptions
            .expire_pending_at(self.options.subscription_timeout_s, chrono::Utc::now());
        for id in expired {
            warn!(connection = %self.name, id = %id, "Subscription timed out");
            self.adapter.on_subscribe_dropped(&id);
            self.emit(ClientEvent::SubscriptionTimedOut { id });
        }

        self.release_queued().await;
        self.complete_replay().await;

        if self.state.status == ConnectionStatus::Ready
            && self.auth_deadline.is_none()
            && self.state.has_credentials()
            && self.state.auth.needs_reauthentication()
        {
            info!(connection = %self.name, "Token close to expiry, reauthenticating");
            self.begin_auth(false).await;
        }
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn set_status(&mut self, status: ConnectionStatus) {
        self.state.status = status;
        self.shared.status.set(status);
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn phase(&self) -> Phase {
        match self.state.status {
            ConnectionStatus::Disconnected | ConnectionStatus::Connecting => Phase::Connect,
            ConnectionStatus::Connected if self.awaiting_replay => Phase::Subscribe,
            ConnectionStatus::Connected | ConnectionStatus::Authenticating => Phase::Authenticate,
            ConnectionStatus::Ready | ConnectionStatus::Closing => Phase::Receive,
        }
    }

    fn error_context(&self, phase: Phase) -> ErrorContext {
        let params = self.adapter.connection_params();
        ErrorContext::new(phase)
            .host(self.options.host.clone().unwrap_or(params.host))
            .attempt(self.state.reconnect_attempts)
            .with("connection", self.name.to_string())
    }

    fn publish(&self) {
        let snapshot = StatusSnapshot {
            status: self.state.status,
            reconnect_attempts: self.state.reconnect_attempts,
            last_disconnect_reason: self.state.last_disconnect_reason.clone(),
            auth_status: self.state.auth.status,
            auth_expires_at: self.state.auth.expires_at,
            active_subscriptions: self
                .state
                .subscriptions
                .iter()
                .filter(|record| record.status == SubscriptionStatus::Confirmed)
                .count(),
            queued_requests: self.state.limiter.queue_len(),
            available_tokens: self.state.limiter.available_tokens(),
            terminal: self.state.terminal,
            messages_sent: self.shared.metrics.messages_sent(),
            messages_received: self.shared.metrics.messages_received(),
            reconnect_count: self.shared.metrics.reconnect_count(),
        };
        *self.shared.snapshot.write() = snapshot;
    }
}

async fn recv_opt<T>(receiver: &mut Option<UnboundedReceiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn poll_opt<F: Future + Unpin>(future: &mut Option<F>) -> F::Output {
    match future {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
