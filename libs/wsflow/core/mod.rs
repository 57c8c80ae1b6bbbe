//! # Connection core
//!
//! Everything behind a [`Connection`] handle: the orchestrator task that
//! owns the socket, the token bucket in front of it, subscription and auth
//! bookkeeping, and the tungstenite transport.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsflow::{ConnectionBuilder, ConnectionOptions, ClientEvent};
//!
//! #[tokio::main]
//! async fn main() -> wsflow::Result<()> {
//!     let options = ConnectionOptions::load("config/wsflow.yaml")?;
//!     let connection = ConnectionBuilder::new()
//!         .name("deribit")
//!         .adapter(MyAdapter::new())
//!         .options(options)
//!         .connect()
//!         .await?;
//!
//!     connection.subscribe("trades.BTC-PERPETUAL.raw", serde_json::json!({})).await?;
//!
//!     while let Ok(event) = connection.recv_event() {
//!         println!("Event: {:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth_flow;
pub mod builder;
pub mod client;
pub mod config;
pub mod error_policy;
pub(crate) mod orchestrator;
pub mod rate_limiter;
pub mod status;
pub mod subscriptions;
pub mod tungstenite;

// Re-export main types
pub use auth_flow::{AuthOutcome, AuthState, AuthStatus};
pub use builder::{states, ConnectionBuilder};
pub use client::{ClientEvent, Connection, SendOptions, StatusSnapshot};
pub use config::{ConfigError, ConfigResult, ConnectionOptions, RateLimitConfig};
pub use error_policy::{ErrorDecision, ErrorPolicy, ReconnectDecision};
pub use rate_limiter::{Admission, RateLimitRequest, RateLimiter, Tick};
pub use status::{AtomicConnectionStatus, AtomicMetrics, ConnectionStatus};
pub use subscriptions::{
    ResponseOutcome, StatusChange, SubscriptionRecord, SubscriptionRegistry, SubscriptionStatus,
};
pub use tungstenite::TungsteniteTransport;
