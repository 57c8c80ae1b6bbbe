//! # Deribit adapter for wsflow
//!
//! Connects to the Deribit v2 JSON-RPC WebSocket API.
//!
//! ```rust,ignore
//! use deribit::DeribitConfig;
//!
//! let config = DeribitConfig::from_env()?;
//! let connection = wsflow::connect(config.adapter(), config.options()).await?;
//! connection
//!     .subscribe("ticker.BTC-PERPETUAL.100ms", serde_json::json!({}))
//!     .await?;
//! ```

pub mod adapter;
pub mod auth;
pub mod config;
pub mod protocol;

pub use adapter::DeribitAdapter;
pub use auth::{GrantType, SignatureError};
pub use config::{default_options, DeribitConfig};
