//! Connection lifecycle state and status snapshots

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;
use crate::message::Message;

/// Lifecycle state of a managed connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport; initial state and the result of `disconnect()`
    #[default]
    Disconnected,
    /// A transport open is in flight
    Connecting,
    /// The transport is open and frames flow
    Connected,
    /// The last open failed or the transport dropped; a retry may be pending
    Error,
}

impl ConnectionState {
    /// Whether a transport is open or being opened
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Details of a transport closure, as reported to `on_close`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code (1000 normal, 1006 abnormal, ...)
    pub code: u16,
    /// Close reason
    pub reason: String,
    /// Whether the closure was clean (normal close handshake)
    pub clean: bool,
    /// Whether the closure was requested through `disconnect()`
    pub intentional: bool,
}

/// Point-in-time view of a connection
#[derive(Clone, Debug, Default)]
pub struct ConnectionStatus {
    /// Current lifecycle state
    pub state: ConnectionState,
    /// Target of the current or most recent subscription
    pub target: Option<String>,
    /// Automatic reconnect attempts made since the last successful open
    pub retry_count: u32,
    /// Most recent error
    pub last_error: Option<ConnectionError>,
    /// Most recently delivered message
    pub last_message: Option<Message>,
    /// Set when the manager gave up reconnecting
    ///
    /// Distinguishes "stopped after too many failures" from a
    /// user-initiated disconnect; both settle in `Disconnected`.
    pub retries_exhausted: bool,
}

impl ConnectionStatus {
    /// Whether the connection is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
