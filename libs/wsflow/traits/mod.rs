//! # wsflow Traits
//!
//! Extension points and shared types for the wsflow WebSocket client.
//!
//! An adapter integrates a platform by implementing six small behaviours:
//!
//! - **ConnectionHandler**: connection parameters, headers, heartbeat frame
//! - **AuthHandler**: auth payload and auth response classification
//! - **SubscriptionHandler**: subscribe/unsubscribe encoding and acks
//! - **MessageHandler**: inbound routing and outbound encoding
//! - **ErrorHandler**: error classification and logging
//! - **RateLimitHandler**: request categories for the token bucket
//!
//! The raw socket layer sits behind **Transport** / **TransportHandle**.

pub mod adapter;
pub mod auth;
pub mod connection;
pub mod error;
pub mod error_handler;
pub mod message;
pub mod rate_limit;
pub mod reconnect;
pub mod router;
pub mod subscription;
pub mod transport;

// Re-export commonly used types
pub use adapter::Adapter;
pub use auth::{AuthExpiry, AuthHandler, AuthResponse, Credentials};
pub use connection::{ConnectionHandler, ConnectionParams, Headers};
pub use error::{ErrorCategory, RateLimitReason, Result, WsError};
pub use error_handler::{default_classify, ErrorContext, ErrorHandler, Phase};
pub use message::WsMessage;
pub use rate_limit::{RateLimitHandler, AUTH_CATEGORY, DEFAULT_CATEGORY, SUBSCRIBE_CATEGORY};
pub use reconnect::{ExponentialBackoff, FixedDelay, NeverReconnect, ReconnectionStrategy};
pub use router::{InboundKind, MessageHandler, ResponseMatcher};
pub use subscription::{SubscriptionHandler, SubscriptionKey, SubscriptionResponse};
pub use transport::{ConnectionInfo, Transport, TransportEvent, TransportEventSink, TransportHandle};
