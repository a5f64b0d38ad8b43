//! Transport Layer for Log Streams
//!
//! Separates the wire mechanism from the connection manager:
//! - `InProcess`: channel-backed transport for embedding and tests
//! - `WebSocket`: remote log server over `ws://` / `wss://` (feature `websocket`)
//!
//! A [`TransportConnector`] opens connections to a target address; the
//! resulting [`TransportConnection`] carries text frames both ways and
//! reports how it ended. The manager owns reconnect policy, so transports
//! never retry on their own.

pub mod in_process;
#[cfg(feature = "websocket")]
pub mod websocket;

use async_trait::async_trait;

use crate::error::TransportError;

pub use in_process::{ClientFrame, InProcessConnector, InProcessListener, InProcessPeer};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

/// Close code for a normal, intentional closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when no close status was present in the close frame
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code for a connection lost without a close handshake
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code the manager uses when it abandons an idle connection
pub const READ_TIMEOUT_CLOSURE: u16 = 4000;

/// How a transport connection ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code
    pub code: u16,
    /// Close reason (may be empty)
    pub reason: String,
    /// Whether the close was clean
    pub clean: bool,
}

impl CloseFrame {
    /// A close with the given code; clean only for [`NORMAL_CLOSURE`]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            clean: code == NORMAL_CLOSURE,
        }
    }

    /// A normal closure
    #[must_use]
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(NORMAL_CLOSURE, reason)
    }

    /// The connection was lost without a close handshake
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSURE, reason)
    }
}

/// Something observed on an open transport connection
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound text frame
    Text(String),
    /// A non-fatal error; the connection may still end with `Closed`
    Error(TransportError),
    /// The connection ended
    Closed(CloseFrame),
}

/// Opens transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Open a connection to `target`
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] when the target cannot be
    /// reached or refuses the connection.
    async fn open(&self, target: &str) -> Result<Box<dyn TransportConnection>, TransportError>;
}

/// One open transport connection
#[async_trait]
pub trait TransportConnection: Send {
    /// Send a text frame
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be written.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next event
    ///
    /// Must be cancel-safe: the manager polls it inside `select!`.
    /// Returns `None` once the connection has ended and its `Closed` event
    /// was already delivered.
    async fn recv(&mut self) -> Option<TransportEvent>;

    /// Start the close handshake with the given code and reason
    ///
    /// # Errors
    ///
    /// Returns an error if the close frame could not be written.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_frame_cleanliness() {
        assert!(CloseFrame::normal("bye").clean);
        assert!(!CloseFrame::abnormal("reset").clean);
        assert!(!CloseFrame::new(1001, "going away").clean);
        assert_eq!(CloseFrame::abnormal("reset").code, ABNORMAL_CLOSURE);
    }
}
