//! Lock-free connection status and counters
//!
//! The orchestrator task is the only writer; caller handles, the registry
//! and tests read these from any thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Status of the connection state machine
///
/// ```text
/// Disconnected → Connecting → Connected → Authenticating → Ready
///       ↑                                                    │
///       └──────────────── (disconnect / close) ──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Authenticating = 3,
    Ready = 4,
    Closing = 5,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Connected,
            3 => ConnectionStatus::Authenticating,
            4 => ConnectionStatus::Ready,
            5 => ConnectionStatus::Closing,
            _ => ConnectionStatus::Disconnected,
        }
    }

    /// Whether a transport is open in this state
    pub fn has_transport(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connected | ConnectionStatus::Authenticating | ConnectionStatus::Ready
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Authenticating => "authenticating",
            ConnectionStatus::Ready => "ready",
            ConnectionStatus::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Atomic wrapper around [`ConnectionStatus`]
#[derive(Debug)]
pub struct AtomicConnectionStatus(AtomicU8);

impl AtomicConnectionStatus {
    pub fn new(state: ConnectionStatus) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, state: ConnectionStatus) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transition only if the current state is `current`
    pub fn compare_exchange(
        &self,
        current: ConnectionStatus,
        new: ConnectionStatus,
    ) -> Result<ConnectionStatus, ConnectionStatus> {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(ConnectionStatus::from_u8)
            .map_err(ConnectionStatus::from_u8)
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.get() == ConnectionStatus::Ready
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.get().has_transport()
    }

    #[inline]
    pub fn is_connecting(&self) -> bool {
        self.get() == ConnectionStatus::Connecting
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.get() == ConnectionStatus::Disconnected
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.get() == ConnectionStatus::Closing
    }
}

impl Default for AtomicConnectionStatus {
    fn default() -> Self {
        Self::new(ConnectionStatus::Disconnected)
    }
}

/// Message and reconnect counters
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    reconnect_count: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_reconnects(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }
}
