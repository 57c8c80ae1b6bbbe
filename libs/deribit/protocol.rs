//! JSON-RPC 2.0 framing for the Deribit v2 WebSocket API

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use wsflow::{Result, WsError, WsMessage};

pub const MAINNET_HOST: &str = "www.deribit.com";
pub const TESTNET_HOST: &str = "test.deribit.com";
pub const WS_PATH: &str = "/ws/api/v2";

pub const AUTH: &str = "public/auth";
pub const TEST: &str = "public/test";
pub const PUBLIC_SUBSCRIBE: &str = "public/subscribe";
pub const PUBLIC_UNSUBSCRIBE: &str = "public/unsubscribe";
pub const PRIVATE_SUBSCRIBE: &str = "private/subscribe";
pub const PRIVATE_UNSUBSCRIBE: &str = "private/unsubscribe";

/// Rate limit categories; order placement is metered separately
pub const MATCHING_ENGINE: &str = "matching_engine";
pub const NON_MATCHING: &str = "non_matching";

const MATCHING_ENGINE_METHODS: &[&str] = &[
    "private/buy",
    "private/sell",
    "private/edit",
    "private/edit_by_label",
    "private/cancel",
    "private/cancel_by_label",
    "private/cancel_all",
    "private/cancel_all_by_currency",
    "private/cancel_all_by_instrument",
    "private/close_position",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    pub fn to_frame(&self) -> Result<WsMessage> {
        serde_json::to_string(self)
            .map(WsMessage::Text)
            .map_err(|e| WsError::Protocol(format!("encode {}: {}", self.method, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Any inbound frame: a response (`id` set) or a notification (`method` set)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl RpcFrame {
    pub fn parse(frame: &WsMessage) -> Result<Self> {
        let parsed = match frame {
            WsMessage::Text(text) => serde_json::from_str(text),
            WsMessage::Binary(data) => serde_json::from_slice(data),
            _ => return Err(WsError::Protocol("not a data frame".to_string())),
        };
        parsed.map_err(|e| WsError::Protocol(format!("invalid JSON-RPC frame: {}", e)))
    }

    /// `params.type` of a `heartbeat` notification
    pub fn heartbeat_type(&self) -> Option<&str> {
        if self.method.as_deref() != Some("heartbeat") {
            return None;
        }
        self.params.as_ref()?.get("type")?.as_str()
    }
}

/// Monotonic request ids, shared by every frame the adapter encodes
#[derive(Debug)]
pub struct RequestIds(AtomicU64);

impl RequestIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_matching_engine(method: &str) -> bool {
    MATCHING_ENGINE_METHODS.contains(&method)
}

/// Channels under `user.` need an authenticated subscribe
pub fn is_private_channel(channel: &str) -> bool {
    channel.starts_with("user.")
}
