use std::fmt;
use thiserror::Error;

/// Main error type for wsflow
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WsError {
    /// Transport-level failure (connect refused, DNS, send failure)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connection closed unexpectedly
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Server rejected the credentials or the token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Credentials absent or missing a required field
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Malformed frame or undecodable payload
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Rejected by the token bucket
    #[error("Rate limit exceeded: {0}")]
    RateLimited(RateLimitReason),

    /// Server rejected a subscribe or unsubscribe request
    #[error("Subscription {id} failed: {reason}")]
    Subscription { id: String, reason: String },

    /// No response within the configured window
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unknown subscription id or connection name
    #[error("Not found: {0}")]
    NotFound(String),

    /// General traffic is gated on the ready state
    #[error("Connection not ready (status: {0})")]
    NotReady(String),

    /// Command channel to the connection task is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Reconnection abandoned
    #[error("Reconnection failed after {attempts} attempts: {reason}")]
    ReconnectionFailed { attempts: u32, reason: String },

    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

impl WsError {
    /// Whether this error comes from credentials or the auth exchange
    pub fn is_auth(&self) -> bool {
        matches!(self, WsError::Auth(_) | WsError::MissingCredentials(_))
    }
}

/// Reason attached to a rate limiter rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// No tokens and the queue is full
    RateLimitExceeded,
}

impl fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitReason::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
        }
    }
}

/// Severity category computed for an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-level; retried with backoff
    Transient,
    /// Credentials; the connection is stopped
    Critical,
    /// A single bad message; logged and skipped
    Normal,
    /// Unrecognised; treated as transient
    Unknown,
}

impl ErrorCategory {
    /// Unknown errors fail open toward retrying
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Transient | ErrorCategory::Unknown)
    }
}

/// Result type for wsflow operations
pub type Result<T> = std::result::Result<T, WsError>;
