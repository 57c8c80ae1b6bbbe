use crate::connection::ConnectionParams;
use crate::error::Result;
use crate::message::WsMessage;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Information reported when the transport connects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub url: String,
    pub protocol: Option<String>,
}

/// Asynchronous events delivered by a transport to the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected(ConnectionInfo),
    Frame(WsMessage),
    Disconnected(String),
    Timeout,
}

/// Sink a transport delivers its events into
///
/// Every connection attempt gets a fresh sink, so events from a previous
/// socket can never leak into the next one.
pub type TransportEventSink = UnboundedSender<TransportEvent>;

/// Raw socket layer: TCP/TLS connect, WebSocket handshake, frame I/O
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection
    ///
    /// Implementations must emit `TransportEvent::Connected` on `events`
    /// once the handshake completes, then every received frame, and finally
    /// `Disconnected` when the socket ends for any reason other than a local
    /// `close`.
    async fn connect(
        &self,
        params: &ConnectionParams,
        events: TransportEventSink,
    ) -> Result<Box<dyn TransportHandle>>;
}

/// Handle to one open transport connection
#[async_trait]
pub trait TransportHandle: Send + 'static {
    async fn send(&mut self, frame: WsMessage) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}
