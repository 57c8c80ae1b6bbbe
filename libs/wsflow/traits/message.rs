/// A WebSocket frame as seen by the core
///
/// Data frames (`Text`, `Binary`) carry adapter payloads. Control frames
/// (`Ping`, `Pong`, `Close`) are handled by the orchestrator and never go
/// through the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<String>),
}

impl WsMessage {
    /// Get the message as text, if it is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsMessage::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the message as binary, if it is binary
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            WsMessage::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Check if message is text
    pub fn is_text(&self) -> bool {
        matches!(self, WsMessage::Text(_))
    }

    /// Check if message is binary
    pub fn is_binary(&self) -> bool {
        matches!(self, WsMessage::Binary(_))
    }

    /// Check if this is a control frame (ping, pong, close)
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_)
        )
    }

    /// Parse a text or binary payload as JSON
    ///
    /// Returns `None` for control frames and for payloads that are not JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        match self {
            WsMessage::Text(text) => serde_json::from_str(text).ok(),
            WsMessage::Binary(data) => serde_json::from_slice(data).ok(),
            _ => None,
        }
    }

    /// Build a text frame from a JSON value
    pub fn from_json(value: &serde_json::Value) -> Self {
        WsMessage::Text(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip_through_text_frame() {
        let frame = WsMessage::from_json(&json!({"method": "public/test"}));
        assert!(frame.is_text());
        assert_eq!(frame.json().unwrap()["method"], "public/test");
    }

    #[test]
    fn test_control_frames_have_no_json() {
        assert!(WsMessage::Ping(b"{}".to_vec()).json().is_none());
        assert!(WsMessage::Ping(vec![]).is_control());
        assert!(!WsMessage::Text("x".into()).is_control());
        assert!(WsMessage::Text("not json".into()).json().is_none());
    }
}
