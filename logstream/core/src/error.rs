//! Error Types
//!
//! Two layers of errors:
//! - [`TransportError`]: raised by a transport implementation (socket, channel)
//! - [`ConnectionError`]: what the connection manager reports to its consumer
//!
//! Transport errors never escape the manager as faults. They are folded into
//! a [`ConnectionError`], recorded as the connection's last error and handed
//! to the observer.

use thiserror::Error;

/// Errors raised by a transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer is gone
    #[error("Connection closed")]
    ConnectionClosed,

    /// Writing a frame failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The peer violated the framing protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An operation did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO error from the underlying socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by the connection manager
///
/// Cloneable so the manager can keep the most recent one in its status
/// snapshot while also handing it to the observer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The transport could not be opened
    #[error("Failed to connect to {target}: {reason}")]
    ConnectFailure {
        /// Target address that was being opened
        target: String,
        /// Underlying failure
        reason: String,
    },

    /// The transport closed without a clean close handshake
    #[error("Connection closed abnormally (code {code}): {reason}")]
    AbnormalClose {
        /// Close code reported by the transport
        code: u16,
        /// Close reason reported by the transport
        reason: String,
    },

    /// The retry budget is spent; only an explicit `connect()` resumes
    #[error("Gave up reconnecting after {attempts} attempts")]
    RetryExhausted {
        /// Number of automatic attempts that were made
        attempts: u32,
    },

    /// `send()` was called while the connection was not open
    #[error("Not connected")]
    NotConnected,

    /// The target address is empty or malformed
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// A frame could not be written to an open transport
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// An outbound payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A transport-level error on an open connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// No frame arrived within the configured read timeout
    #[error("No data received for {millis}ms")]
    ReadTimeout {
        /// Configured timeout in milliseconds
        millis: u64,
    },

    /// The manager's driver task is no longer running
    #[error("Connection manager stopped")]
    Stopped,
}

impl ConnectionError {
    /// Whether an automatic reconnect may still recover from this error
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailure { .. }
                | Self::AbnormalClose { .. }
                | Self::Transport(_)
                | Self::ReadTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: TransportError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::AbnormalClose {
            code: 1006,
            reason: "reset".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Connection closed abnormally (code 1006): reset"
        );

        let err = ConnectionError::RetryExhausted { attempts: 2 };
        assert!(err.to_string().contains("2 attempts"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(ConnectionError::AbnormalClose {
            code: 1006,
            reason: String::new()
        }
        .is_recoverable());
        assert!(!ConnectionError::NotConnected.is_recoverable());
        assert!(!ConnectionError::RetryExhausted { attempts: 3 }.is_recoverable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ConnectionError = err.into();
        assert!(matches!(err, ConnectionError::Serialization(_)));
    }
}
