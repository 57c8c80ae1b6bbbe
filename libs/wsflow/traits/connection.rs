use crate::message::WsMessage;
use std::collections::HashMap;
use std::time::Duration;

/// HTTP headers to send with the WebSocket upgrade request
pub type Headers = HashMap<String, String>;

/// Where and how to open the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls: bool,
    pub headers: Headers,
    pub connect_timeout: Duration,
}

impl ConnectionParams {
    /// Create params with default timeout and no headers
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            tls,
            headers: Headers::new(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Full WebSocket URL (`ws://` or `wss://`)
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}:{}{}", scheme, self.host, self.port, path)
    }
}

/// Connection lifecycle behaviour supplied by an adapter
///
/// The orchestrator asks for the connection parameters on every
/// (re)connect, so headers carrying timestamps or nonces stay fresh.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Default host/port/path/TLS for the platform
    ///
    /// Values set in `ConnectionOptions` override these.
    fn connection_params(&self) -> ConnectionParams;

    /// Extra headers for the upgrade request
    fn headers(&self) -> Headers {
        Headers::new()
    }

    /// Frame to send on every heartbeat tick, if the platform wants one
    fn heartbeat_message(&self) -> Option<WsMessage> {
        None
    }

    /// Called when the transport reports it is connected
    fn on_connected(&self) {}

    /// Called after every disconnect, before the reconnect decision
    fn on_disconnected(&self, _reason: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let params = ConnectionParams::new("test.deribit.com", 443, "/ws/api/v2", true);
        assert_eq!(params.url(), "wss://test.deribit.com:443/ws/api/v2");

        let params = ConnectionParams::new("127.0.0.1", 9000, "stream", false);
        assert_eq!(params.url(), "ws://127.0.0.1:9000/stream");
    }
}
