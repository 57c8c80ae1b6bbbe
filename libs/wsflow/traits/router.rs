//! Inbound routing and outbound encoding
//!
//! # Architecture
//!
//! ```text
//! Transport → Ping? ──────────────────────────────→ Pong (same payload)
//!           → classify_inbound → Heartbeat ───────→ adapter reply frame
//!                              → Auth ────────────→ AuthFlow
//!                              → Subscription ────→ SubscriptionRegistry
//!                              → Response/App ────→ pending request? → caller
//!                                                   otherwise       → ClientEvent::Message
//! ```
//!
//! Frames of one connection are routed in receipt order by the single
//! orchestrator task.

use crate::error::Result;
use crate::message::WsMessage;
use serde_json::Value;
use std::sync::Arc;

/// Predicate matching the response to an outbound request
pub type ResponseMatcher = Arc<dyn Fn(&WsMessage) -> bool + Send + Sync>;

/// Where an inbound data frame should be routed
#[derive(Debug, Clone, PartialEq)]
pub enum InboundKind {
    /// Response to the authentication request
    Auth,
    /// Subscription acknowledgement or rejection
    Subscription,
    /// Application-level heartbeat from the server, answered with `reply`
    Heartbeat { reply: Option<WsMessage> },
    /// Everything else: responses to requests and pushed data
    Application,
    /// Drop silently
    Ignore,
}

/// Message encoding and inbound classification supplied by an adapter
pub trait MessageHandler: Send + Sync + 'static {
    /// Classify an inbound data frame for routing
    ///
    /// # Errors
    /// Return `WsError::Protocol` for undecodable frames. The frame is
    /// logged and dropped; the connection stays up.
    fn classify_inbound(&self, frame: &WsMessage) -> Result<InboundKind>;

    /// Encode an application message into a wire frame
    fn encode_outbound(&self, message: &Value) -> Result<WsMessage>;

    /// Derive a matcher for the response to an already encoded frame
    ///
    /// Used by `Connection::request` for request/response correlation.
    fn response_matcher(&self, _frame: &WsMessage) -> Option<ResponseMatcher> {
        None
    }
}
