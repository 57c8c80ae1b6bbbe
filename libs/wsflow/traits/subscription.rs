use crate::error::Result;
use crate::message::WsMessage;
use serde_json::Value;

/// How a server acknowledgement identifies its subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// The subscription id the core allocated
    Id(String),
    /// The channel name echoed by the server
    Channel(String),
}

/// Adapter classification of a subscription acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionResponse {
    Confirmed(SubscriptionKey),
    Failed { key: SubscriptionKey, reason: String },
    Unrelated,
}

/// Subscription wire format supplied by an adapter
pub trait SubscriptionHandler: Send + Sync + 'static {
    /// Encode a subscribe request for `channel`
    ///
    /// `id` is the subscription id allocated by the registry. Adapters whose
    /// protocol cannot carry it should acknowledge by channel instead.
    fn encode_subscribe(&self, channel: &str, params: &Value, id: &str) -> Result<WsMessage>;

    /// Encode an unsubscribe request
    ///
    /// Returning `Ok(None)` means the platform has no unsubscribe message;
    /// the record is still marked unsubscribed locally.
    fn encode_unsubscribe(&self, _channel: &str, _id: &str) -> Result<Option<WsMessage>> {
        Ok(None)
    }

    /// Classify an inbound frame as a subscription ack, a failure, or unrelated
    fn classify_subscription_response(&self, frame: &WsMessage) -> SubscriptionResponse;

    /// The subscribe encoded under `id` will never be acknowledged
    ///
    /// Called when it is rejected by the rate limiter, skipped at dispatch,
    /// dropped with a closing socket or times out.
    fn on_subscribe_dropped(&self, _id: &str) {}
}
