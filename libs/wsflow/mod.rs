//! # wsflow
//!
//! A resilient WebSocket connection layer for exchange APIs.
//!
//! A platform is integrated by writing one [`Adapter`]; wsflow takes care of
//! the rest of the lifecycle:
//!
//! - **Connect and reconnect** with exponential backoff and jitter
//! - **Authenticate** on every new socket and refresh before expiry
//! - **Track subscriptions** and replay them after a reconnect
//! - **Rate limit** outbound traffic through a token bucket with a bounded queue
//! - **Correlate requests** with their responses
//!
//! Each connection runs as one tokio task. [`Connection`] handles talk to it
//! over a command channel and receive [`ClientEvent`]s over an unbounded
//! crossbeam channel.

pub mod traits;
pub mod core;
pub mod manager;

// Re-export all traits
pub use traits::*;

// Re-export core modules at the crate root
pub use crate::core::{
    auth_flow, builder, client, config, error_policy, rate_limiter, status, subscriptions,
    tungstenite,
};
pub(crate) use crate::core::orchestrator;

// Re-export core types
pub use crate::core::{
    Admission, AtomicConnectionStatus, AtomicMetrics, AuthOutcome, AuthState, AuthStatus,
    ClientEvent, ConfigError, ConfigResult, Connection, ConnectionBuilder, ConnectionOptions,
    ConnectionStatus, ErrorDecision, ErrorPolicy, RateLimitConfig, RateLimitRequest, RateLimiter,
    ReconnectDecision, ResponseOutcome, SendOptions, StatusChange, StatusSnapshot,
    SubscriptionRecord, SubscriptionRegistry, SubscriptionStatus, Tick, TungsteniteTransport,
};

// Re-export manager
pub use manager::{registry, ConnectionRegistry, RegistrationGuard};

/// Connect a single adapter with the given options
///
/// Shorthand for the builder with the default transport and backoff.
///
/// # Example
/// ```ignore
/// let connection = wsflow::connect(MyAdapter::new(), ConnectionOptions::default()).await?;
/// ```
pub async fn connect<A: Adapter>(adapter: A, options: ConnectionOptions) -> Result<Connection> {
    ConnectionBuilder::new()
        .adapter(adapter)
        .options(options)
        .connect()
        .await
}
