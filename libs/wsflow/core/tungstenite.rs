//! Transport over `tokio-tungstenite`
//!
//! The socket is split: the write half lives in the returned handle, the
//! read half in a reader task that forwards every frame to the event sink
//! and reports `Disconnected` when the stream ends. Closing or dropping the
//! handle aborts the reader, so a local close produces no event.

use crate::connection::ConnectionParams;
use crate::error::{Result, WsError};
use crate::message::WsMessage;
use crate::transport::{ConnectionInfo, Transport, TransportEvent, TransportEventSink, TransportHandle};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Production transport (TLS via native-tls)
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(&self, params: &ConnectionParams, events: TransportEventSink) -> Result<Box<dyn TransportHandle>> {
        let url = params.url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| WsError::Configuration(format!("invalid url {}: {}", url, e)))?;

        for (key, value) in &params.headers {
            match (
                key.parse::<http::header::HeaderName>(),
                value.parse::<http::header::HeaderValue>(),
            ) {
                (Ok(name), Ok(value)) => {
                    request.headers_mut().insert(name, value);
                }
                _ => warn!("Skipping invalid header '{}'", key),
            }
        }

        debug!("Connecting to {}", url);
        let (stream, response) = match tokio::time::timeout(params.connect_timeout, connect_async(request)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(WsError::Transport(e.to_string())),
            Err(_) => return Err(WsError::Timeout(format!("connect to {}", url))),
        };

        let protocol = response
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let (write, read) = stream.split();
        let _ = events.send(TransportEvent::Connected(ConnectionInfo { url, protocol }));
        let reader = tokio::spawn(read_loop(read, events));

        Ok(Box::new(TungsteniteHandle { write, reader }))
    }
}

async fn read_loop(
    mut read: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    events: TransportEventSink,
) {
    let mut close_reason = None;

    let reason = loop {
        match read.next().await {
            Some(Ok(message)) => {
                let Some(frame) = from_tungstenite(message) else {
                    continue;
                };
                if let WsMessage::Close(reason) = &frame {
                    close_reason = Some(format!(
                        "closed by server: {}",
                        reason.as_deref().unwrap_or("no reason")
                    ));
                }
                if events.send(TransportEvent::Frame(frame)).is_err() {
                    // Orchestrator moved on to another socket
                    return;
                }
            }
            Some(Err(e)) => break close_reason.unwrap_or_else(|| e.to_string()),
            None => break close_reason.unwrap_or_else(|| "stream ended".to_string()),
        }
    };

    debug!("Socket ended: {}", reason);
    let _ = events.send(TransportEvent::Disconnected(reason));
}

struct TungsteniteHandle {
    write: WsSink,
    reader: JoinHandle<()>,
}

#[async_trait]
impl TransportHandle for TungsteniteHandle {
    async fn send(&mut self, frame: WsMessage) -> Result<()> {
        self.write
            .send(to_tungstenite(frame))
            .await
            .map_err(|e| WsError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.abort();
        self.write
            .close()
            .await
            .map_err(|e| WsError::Transport(e.to_string()))
    }
}

impl Drop for TungsteniteHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn to_tungstenite(frame: WsMessage) -> Message {
    match frame {
        WsMessage::Text(text) => Message::Text(text),
        WsMessage::Binary(data) => Message::Binary(data),
        WsMessage::Ping(data) => Message::Ping(data),
        WsMessage::Pong(data) => Message::Pong(data),
        WsMessage::Close(reason) => Message::Close(reason.map(|reason| CloseFrame {
            code: CloseCode::Normal,
            reason: reason.into(),
        })),
    }
}

fn from_tungstenite(message: Message) -> Option<WsMessage> {
    match message {
        Message::Text(text) => Some(WsMessage::Text(text)),
        Message::Binary(data) => Some(WsMessage::Binary(data)),
        Message::Ping(data) => Some(WsMessage::Ping(data)),
        Message::Pong(data) => Some(WsMessage::Pong(data)),
        Message::Close(frame) => Some(WsMessage::Close(frame.map(|frame| frame.reason.into_owned()))),
        Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_conversion() {
        assert_eq!(
            from_tungstenite(to_tungstenite(WsMessage::Ping(vec![1, 2, 3]))),
            Some(WsMessage::Ping(vec![1, 2, 3]))
        );
        assert_eq!(
            from_tungstenite(to_tungstenite(WsMessage::Close(Some("bye".into())))),
            Some(WsMessage::Close(Some("bye".into())))
        );
        assert_eq!(
            from_tungstenite(Message::Text("{}".into())),
            Some(WsMessage::Text("{}".into()))
        );
    }
}
