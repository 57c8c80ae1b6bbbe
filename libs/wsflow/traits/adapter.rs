use crate::auth::AuthHandler;
use crate::connection::ConnectionHandler;
use crate::error_handler::ErrorHandler;
use crate::rate_limit::RateLimitHandler;
use crate::router::MessageHandler;
use crate::subscription::SubscriptionHandler;

/// A platform integration
///
/// Implemented automatically for any type providing all six behaviours.
/// The core depends only on this contract, never on concrete adapters.
///
/// # Example
///
/// ```ignore
/// struct MyExchange;
///
/// impl ConnectionHandler for MyExchange { ... }
/// impl AuthHandler for MyExchange { ... }
/// impl SubscriptionHandler for MyExchange { ... }
/// impl MessageHandler for MyExchange { ... }
/// impl ErrorHandler for MyExchange {}
/// impl RateLimitHandler for MyExchange {}
///
/// let connection = wsflow::connect(MyExchange, ConnectionOptions::default()).await?;
/// ```
pub trait Adapter:
    ConnectionHandler + AuthHandler + SubscriptionHandler + MessageHandler + ErrorHandler + RateLimitHandler
{
}

impl<T> Adapter for T where
    T: ConnectionHandler
        + AuthHandler
        + SubscriptionHandler
        + MessageHandler
        + ErrorHandler
        + RateLimitHandler
{
}
