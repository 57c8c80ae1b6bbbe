use serde_json::Value;

/// Category used for auth requests when admitting them through the limiter
pub const AUTH_CATEGORY: &str = "auth";

/// Category used for subscribe / unsubscribe requests
pub const SUBSCRIBE_CATEGORY: &str = "subscribe";

/// Category used when an adapter does not categorise a message
pub const DEFAULT_CATEGORY: &str = "default";

/// Rate limit categorisation supplied by an adapter
///
/// The category selects the token cost from the configured `cost_map`.
pub trait RateLimitHandler: Send + Sync + 'static {
    fn category(&self, _message: &Value) -> String {
        DEFAULT_CATEGORY.to_string()
    }

    /// Queue priority when the bucket is empty (higher goes first)
    fn priority(&self, _message: &Value) -> u8 {
        0
    }
}
