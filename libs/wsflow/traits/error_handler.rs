use crate::error::{ErrorCategory, WsError};
use std::collections::HashMap;
use std::fmt;
use tracing::{error, info, warn};

/// Lifecycle phase an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Connect,
    Authenticate,
    Subscribe,
    Send,
    Receive,
    Heartbeat,
    Housekeeping,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connect => "connect",
            Phase::Authenticate => "authenticate",
            Phase::Subscribe => "subscribe",
            Phase::Send => "send",
            Phase::Receive => "receive",
            Phase::Heartbeat => "heartbeat",
            Phase::Housekeeping => "housekeeping",
        };
        f.write_str(name)
    }
}

/// Situational metadata attached to an error while it is being handled
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    pub phase: Phase,
    pub host: Option<String>,
    pub attempt: u32,
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            host: None,
            attempt: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Default classification rules
///
/// - network-level (transport, unexpected close, timeout) → transient
/// - credentials / auth exchange → critical
/// - malformed or undecodable messages → normal
/// - anything else → unknown (treated as transient by every decision)
pub fn default_classify(error: &WsError) -> ErrorCategory {
    match error {
        WsError::Transport(_) | WsError::ConnectionClosed(_) | WsError::Timeout(_) => {
            ErrorCategory::Transient
        }
        WsError::Auth(_) | WsError::MissingCredentials(_) => ErrorCategory::Critical,
        WsError::Protocol(_) => ErrorCategory::Normal,
        WsError::RateLimited(_)
        | WsError::Subscription { .. }
        | WsError::NotFound(_)
        | WsError::NotReady(_) => ErrorCategory::Normal,
        WsError::Configuration(_) => ErrorCategory::Critical,
        WsError::ChannelClosed(_) | WsError::ReconnectionFailed { .. } | WsError::Other(_) => {
            ErrorCategory::Unknown
        }
    }
}

/// Error classification and logging supplied by an adapter
///
/// Both methods have defaults; override `classify` to map platform error
/// codes onto categories.
pub trait ErrorHandler: Send + Sync + 'static {
    fn classify(&self, error: &WsError, _context: &ErrorContext) -> ErrorCategory {
        default_classify(error)
    }

    /// Log an error; must not influence the handling decision
    fn log_error(&self, error: &WsError, context: &ErrorContext) {
        match default_classify(error) {
            ErrorCategory::Critical => error!(
                phase = %context.phase,
                attempt = context.attempt,
                host = context.host.as_deref().unwrap_or("-"),
                "{}",
                error
            ),
            ErrorCategory::Transient | ErrorCategory::Unknown => warn!(
                phase = %context.phase,
                attempt = context.attempt,
                host = context.host.as_deref().unwrap_or("-"),
                "{}",
                error
            ),
            ErrorCategory::Normal => info!(phase = %context.phase, "{}", error),
        }
    }
}
