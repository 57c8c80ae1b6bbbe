//! Deribit adapter
//!
//! Maps the wsflow contract onto Deribit's JSON-RPC API:
//!
//! - auth: `public/auth` with `client_credentials` or `client_signature`
//! - subscriptions: `public/subscribe` / `private/subscribe`, acknowledged
//!   by the RPC id of the subscribe request
//! - heartbeats: `test_request` notifications are answered with `public/test`
//! - rate limits: order placement is metered as `matching_engine`,
//!   everything else as `non_matching`

use crate::auth::{self, GrantType, ACCESS_TOKEN, CLIENT_ID, CLIENT_SECRET, REFRESH_TOKEN};
use crate::protocol::{self, RequestIds, RpcFrame, RpcRequest};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use wsflow::{
    AuthExpiry, AuthHandler, AuthResponse, ConnectionHandler, ConnectionParams, Credentials,
    ErrorHandler, InboundKind, MessageHandler, RateLimitHandler, ResponseMatcher, Result,
    SubscriptionHandler, SubscriptionKey, SubscriptionResponse, WsError, WsMessage,
};

/// Deribit error code for `too_many_requests`
const TOO_MANY_REQUESTS: i64 = 10028;

/// In-flight subscribe request
#[derive(Debug, Clone)]
struct PendingSubscribe {
    subscription_id: String,
    channel: String,
}

#[derive(Debug)]
pub struct DeribitAdapter {
    testnet: bool,
    grant_type: GrantType,
    ids: RequestIds,
    auth_request: Mutex<Option<u64>>,
    subscribes: Mutex<HashMap<u64, PendingSubscribe>>,
}

impl DeribitAdapter {
    pub fn new(testnet: bool, grant_type: GrantType) -> Self {
        Self {
            testnet,
            grant_type,
            ids: RequestIds::new(),
            auth_request: Mutex::new(None),
            subscribes: Mutex::new(HashMap::new()),
        }
    }

    pub fn mainnet() -> Self {
        Self::new(false, GrantType::default())
    }

    pub fn testnet() -> Self {
        Self::new(true, GrantType::default())
    }

    pub fn host(&self) -> &'static str {
        if self.testnet {
            protocol::TESTNET_HOST
        } else {
            protocol::MAINNET_HOST
        }
    }

    fn is_auth_response(&self, frame: &RpcFrame) -> bool {
        frame.id.is_some() && frame.id == *self.auth_request.lock()
    }

    fn is_subscribe_response(&self, frame: &RpcFrame) -> bool {
        frame.id.map_or(false, |id| self.subscribes.lock().contains_key(&id))
    }
}

impl ConnectionHandler for DeribitAdapter {
    fn connection_params(&self) -> ConnectionParams {
        ConnectionParams::new(self.host(), 443, protocol::WS_PATH, true)
    }

    fn heartbeat_message(&self) -> Option<WsMessage> {
        RpcRequest::new(self.ids.next(), protocol::TEST, json!({}))
            .to_frame()
            .ok()
    }

    fn on_disconnected(&self, reason: &str) {
        // Responses to requests on the old socket will never arrive
        let dropped = {
            let mut subscribes = self.subscribes.lock();
            let count = subscribes.len();
            subscribes.clear();
            count
        };
        *self.auth_request.lock() = None;
        debug!(dropped, "Deribit socket closed: {}", reason);
    }
}

impl AuthHandler for DeribitAdapter {
    fn required_credentials(&self) -> &[&'static str] {
        &[CLIENT_ID, CLIENT_SECRET]
    }

    fn generate_auth_payload(&self, credentials: &Credentials) -> Result<WsMessage> {
        let params = auth::auth_params(self.grant_type, credentials)
            .map_err(|e| WsError::Auth(e.to_string()))?;

        let id = self.ids.next();
        *self.auth_request.lock() = Some(id);
        RpcRequest::new(id, protocol::AUTH, params).to_frame()
    }

    fn classify_auth_response(&self, frame: &WsMessage) -> AuthResponse {
        let Ok(frame) = RpcFrame::parse(frame) else {
            return AuthResponse::Unrelated;
        };
        if !self.is_auth_response(&frame) {
            return AuthResponse::Unrelated;
        }

        if let Some(error) = frame.error {
            return AuthResponse::Failure {
                reason: format!("{} ({})", error.message, error.code),
            };
        }

        let Some(result) = frame.result else {
            return AuthResponse::Failure {
                reason: "auth response without result".to_string(),
            };
        };

        let mut tokens = HashMap::new();
        for field in [ACCESS_TOKEN, REFRESH_TOKEN] {
            if let Some(token) = result.get(field).and_then(Value::as_str) {
                tokens.insert(field.to_string(), token.to_string());
            }
        }
        let expiry = result
            .get("expires_in")
            .and_then(Value::as_i64)
            .map_or(AuthExpiry::Never, AuthExpiry::In);

        AuthResponse::Success { expiry, tokens }
    }
}

impl SubscriptionHandler for DeribitAdapter {
    fn encode_subscribe(&self, channel: &str, params: &Value, id: &str) -> Result<WsMessage> {
        let method = if protocol::is_private_channel(channel) {
            protocol::PRIVATE_SUBSCRIBE
        } else {
            protocol::PUBLIC_SUBSCRIBE
        };

        let mut rpc_params = match params {
            Value::Object(map) => map.clone(),
            Value::Null => Default::default(),
            other => {
                return Err(WsError::Protocol(format!(
                    "subscribe params must be an object, got {}",
                    other
                )))
            }
        };
        rpc_params.insert("channels".to_string(), json!([channel]));

        let request_id = self.ids.next();
        self.subscribes.lock().insert(
            request_id,
            PendingSubscribe {
                subscription_id: id.to_string(),
                channel: channel.to_string(),
            },
        );
        RpcRequest::new(request_id, method, Value::Object(rpc_params)).to_frame()
    }

    fn encode_unsubscribe(&self, channel: &str, _id: &str) -> Result<Option<WsMessage>> {
        let method = if protocol::is_private_channel(channel) {
            protocol::PRIVATE_UNSUBSCRIBE
        } else {
            protocol::PUBLIC_UNSUBSCRIBE
        };
        RpcRequest::new(self.ids.next(), method, json!({ "channels": [channel] }))
            .to_frame()
            .map(Some)
    }

    fn on_subscribe_dropped(&self, id: &str) {
        self.subscribes
            .lock()
            .retain(|_, pending| pending.subscription_id != id);
    }

    fn classify_subscription_response(&self, frame: &WsMessage) -> SubscriptionResponse {
        let Ok(frame) = RpcFrame::parse(frame) else {
            return SubscriptionResponse::Unrelated;
        };
        let Some(pending) = frame.id.and_then(|id| self.subscribes.lock().remove(&id)) else {
            return SubscriptionResponse::Unrelated;
        };
        let key = SubscriptionKey::Id(pending.subscription_id);

        if let Some(error) = frame.error {
            return SubscriptionResponse::Failed {
                key,
                reason: format!("{} ({})", error.message, error.code),
            };
        }

        let accepted = frame
            .result
            .as_ref()
            .and_then(Value::as_array)
            .map_or(false, |channels| {
                channels.iter().any(|c| c.as_str() == Some(pending.channel.as_str()))
            });
        if accepted {
            SubscriptionResponse::Confirmed(key)
        } else {
            SubscriptionResponse::Failed {
                key,
                reason: format!("channel {} not accepted", pending.channel),
            }
        }
    }
}

impl MessageHandler for DeribitAdapter {
    fn classify_inbound(&self, frame: &WsMessage) -> Result<InboundKind> {
        let rpc = RpcFrame::parse(frame)?;

        if self.is_auth_response(&rpc) {
            return Ok(InboundKind::Auth);
        }
        if self.is_subscribe_response(&rpc) {
            return Ok(InboundKind::Subscription);
        }

        match rpc.heartbeat_type() {
            Some("test_request") => {
                let reply = RpcRequest::new(self.ids.next(), protocol::TEST, json!({})).to_frame()?;
                return Ok(InboundKind::Heartbeat { reply: Some(reply) });
            }
            Some(_) => return Ok(InboundKind::Ignore),
            None => {}
        }

        if let Some(error) = &rpc.error {
            if error.code == TOO_MANY_REQUESTS {
                warn!(id = ?rpc.id, "Deribit rate limit hit: {}", error.message);
            }
        }

        Ok(InboundKind::Application)
    }

    /// Wraps `{"method": ..., "params": ...}` into a JSON-RPC request
    fn encode_outbound(&self, message: &Value) -> Result<WsMessage> {
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| WsError::Protocol("message has no method".to_string()))?;
        let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
        let id = message
            .get("id")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| self.ids.next());

        RpcRequest::new(id, method, params).to_frame()
    }

    fn response_matcher(&self, frame: &WsMessage) -> Option<ResponseMatcher> {
        let id = RpcFrame::parse(frame).ok()?.id?;
        Some(Arc::new(move |inbound: &WsMessage| {
            RpcFrame::parse(inbound).map_or(false, |rpc| rpc.id == Some(id) && rpc.method.is_none())
        }))
    }
}

impl ErrorHandler for DeribitAdapter {}

impl RateLimitHandler for DeribitAdapter {
    fn category(&self, message: &Value) -> String {
        let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
        if protocol::is_matching_engine(method) {
            protocol::MATCHING_ENGINE.to_string()
        } else {
            protocol::NON_MATCHING.to_string()
        }
    }

    /// Cancels jump the queue
    fn priority(&self, message: &Value) -> u8 {
        let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
        if method.starts_with("private/cancel") {
            10
        } else {
            0
        }
    }
}
