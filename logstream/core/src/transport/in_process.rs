//! In-Process Transport
//!
//! Channel-backed transport for embedding a log producer in the same
//! process, and for driving the connection manager deterministically in
//! tests.
//!
//! # Usage
//!
//! ```ignore
//! let (connector, mut listener) = InProcessConnector::new();
//! let manager = ConnectionManager::new(Arc::new(connector), config, observer);
//!
//! manager.connect("mem://logs/abc").await?;
//! let peer = listener.accept().await.unwrap();
//! peer.send_text("line1");
//! peer.close(1000, "done");
//! ```
//!
//! The listener controls how opens behave: it can refuse a number of
//! upcoming opens, refuse all of them, or hold every open for a delay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;

use super::{CloseFrame, TransportConnection, TransportConnector, TransportEvent};

/// Frames the client side writes to the peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientFrame {
    /// A text frame
    Text(String),
    /// The client started the close handshake
    Close(CloseFrame),
}

#[derive(Debug)]
enum PeerFrame {
    Text(String),
    Close(CloseFrame),
}

#[derive(Debug, Default)]
struct OpenPolicy {
    refuse_remaining: usize,
    refuse_all: bool,
    open_delay: Duration,
}

#[derive(Debug)]
struct Shared {
    policy: Mutex<OpenPolicy>,
    attempts: AtomicUsize,
    accept_tx: mpsc::UnboundedSender<InProcessPeer>,
}

/// Connector half of an in-process transport
#[derive(Clone, Debug)]
pub struct InProcessConnector {
    shared: Arc<Shared>,
}

/// Server half of an in-process transport; accepts opened connections
#[derive(Debug)]
pub struct InProcessListener {
    shared: Arc<Shared>,
    accept_rx: mpsc::UnboundedReceiver<InProcessPeer>,
}

impl InProcessConnector {
    /// Create a connector and the listener that accepts its connections
    #[must_use]
    pub fn new() -> (Self, InProcessListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            policy: Mutex::new(OpenPolicy::default()),
            attempts: AtomicUsize::new(0),
            accept_tx,
        });

        (
            Self {
                shared: Arc::clone(&shared),
            },
            InProcessListener { shared, accept_rx },
        )
    }
}

#[async_trait]
impl TransportConnector for InProcessConnector {
    async fn open(&self, target: &str) -> Result<Box<dyn TransportConnection>, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let (delay, refuse) = {
            let mut policy = self.shared.policy.lock();
            let refuse = if policy.refuse_all {
                true
            } else if policy.refuse_remaining > 0 {
                policy.refuse_remaining -= 1;
                true
            } else {
                false
            };
            (policy.open_delay, refuse)
        };

        if !delay.is_zero() {
            // Simulated handshake latency
            tokio::time::sleep(delay).await;
        }

        if refuse {
            tracing::debug!(url = %target, "In-process open refused");
            return Err(TransportError::ConnectionFailed(format!(
                "{target}: connection refused"
            )));
        }

        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();

        let peer = InProcessPeer {
            target: target.to_string(),
            outbound: to_client_tx,
            inbound: to_peer_rx,
        };
        self.shared
            .accept_tx
            .send(peer)
            .map_err(|_| TransportError::ConnectionFailed(format!("{target}: listener closed")))?;

        Ok(Box::new(InProcessConnection {
            outbound: to_peer_tx,
            inbound: to_client_rx,
            finished: false,
        }))
    }
}

impl InProcessListener {
    /// Wait for the next successfully opened connection
    ///
    /// Returns `None` once every connector clone is dropped.
    pub async fn accept(&mut self) -> Option<InProcessPeer> {
        self.accept_rx.recv().await
    }

    /// Take an already opened connection without waiting
    pub fn try_accept(&mut self) -> Option<InProcessPeer> {
        self.accept_rx.try_recv().ok()
    }

    /// Refuse the next `count` opens
    pub fn refuse_next(&self, count: usize) {
        self.shared.policy.lock().refuse_remaining = count;
    }

    /// Refuse every open until switched off again
    pub fn refuse_all(&self, refuse: bool) {
        self.shared.policy.lock().refuse_all = refuse;
    }

    /// Hold every open for `delay` before it succeeds or fails
    pub fn set_open_delay(&self, delay: Duration) {
        self.shared.policy.lock().open_delay = delay;
    }

    /// Number of opens attempted so far, refused ones included
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// Server side of one in-process connection
///
/// Dropping the peer without calling [`InProcessPeer::close`] looks to the
/// client like a lost connection (abnormal closure).
#[derive(Debug)]
pub struct InProcessPeer {
    target: String,
    outbound: mpsc::UnboundedSender<PeerFrame>,
    inbound: mpsc::UnboundedReceiver<ClientFrame>,
}

impl InProcessPeer {
    /// Target the client opened
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Deliver a text frame to the client
    ///
    /// Returns `false` if the client side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outbound.send(PeerFrame::Text(text.into())).is_ok()
    }

    /// Close the connection with a close frame
    pub fn close(self, code: u16, reason: &str) {
        let _ = self
            .outbound
            .send(PeerFrame::Close(CloseFrame::new(code, reason)));
    }

    /// Drop the connection without a close frame
    pub fn drop_connection(self) {
        drop(self);
    }

    /// Wait for the next frame the client wrote
    ///
    /// Returns `None` when the client side is gone.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.inbound.recv().await
    }

    /// Take a frame the client already wrote, without waiting
    pub fn try_recv(&mut self) -> Option<ClientFrame> {
        self.inbound.try_recv().ok()
    }
}

struct InProcessConnection {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    inbound: mpsc::UnboundedReceiver<PeerFrame>,
    finished: bool,
}

#[async_trait]
impl TransportConnection for InProcessConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.finished {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(ClientFrame::Text(text))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        if self.finished {
            return None;
        }
        match self.inbound.recv().await {
            Some(PeerFrame::Text(text)) => Some(TransportEvent::Text(text)),
            Some(PeerFrame::Close(frame)) => {
                self.finished = true;
                Some(TransportEvent::Closed(frame))
            }
            None => {
                self.finished = true;
                Some(TransportEvent::Closed(CloseFrame::abnormal(
                    "connection lost",
                )))
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.finished = true;
        let _ = self
            .outbound
            .send(ClientFrame::Close(CloseFrame::new(code, reason)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NORMAL_CLOSURE;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (connector, mut listener) = InProcessConnector::new();
        let mut conn = connector.open("mem://a").await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.target(), "mem://a");

        assert!(peer.send_text("hello"));
        assert!(matches!(conn.recv().await, Some(TransportEvent::Text(t)) if t == "hello"));

        conn.send("ping".to_string()).await.unwrap();
        assert_eq!(peer.recv().await, Some(ClientFrame::Text("ping".to_string())));
    }

    #[tokio::test]
    async fn test_peer_close_is_clean() {
        let (connector, mut listener) = InProcessConnector::new();
        let mut conn = connector.open("mem://a").await.unwrap();
        let peer = listener.accept().await.unwrap();

        peer.close(NORMAL_CLOSURE, "done");
        match conn.recv().await {
            Some(TransportEvent::Closed(frame)) => {
                assert!(frame.clean);
                assert_eq!(frame.reason, "done");
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert!(conn.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_peer_is_abnormal() {
        let (connector, mut listener) = InProcessConnector::new();
        let mut conn = connector.open("mem://a").await.unwrap();
        listener.accept().await.unwrap().drop_connection();

        match conn.recv().await {
            Some(TransportEvent::Closed(frame)) => {
                assert!(!frame.clean);
                assert_eq!(frame.code, super::super::ABNORMAL_CLOSURE);
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refuse_next_counts_down() {
        let (connector, mut listener) = InProcessConnector::new();
        listener.refuse_next(2);

        assert!(connector.open("mem://a").await.is_err());
        assert!(connector.open("mem://a").await.is_err());
        assert!(connector.open("mem://a").await.is_ok());
        assert_eq!(listener.open_attempts(), 3);
        assert!(listener.try_accept().is_some());
        assert!(listener.try_accept().is_none());
    }

    #[tokio::test]
    async fn test_client_close_reaches_peer() {
        let (connector, mut listener) = InProcessConnector::new();
        let mut conn = connector.open("mem://a").await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        conn.close(NORMAL_CLOSURE, "client disconnect").await.unwrap();
        assert_eq!(
            peer.recv().await,
            Some(ClientFrame::Close(CloseFrame::normal("client disconnect")))
        );
        assert!(conn.send("late".to_string()).await.is_err());
    }
}
