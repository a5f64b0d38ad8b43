//! Connection Observers
//!
//! The connection manager reports everything that happens on a connection
//! through a [`ConnectionObserver`]. All callbacks for one connection are
//! invoked from that connection's driver task, one at a time and in event
//! order, so an implementation never sees overlapping calls and `on_close`
//! never arrives ahead of messages received before it.
//!
//! Three ready-made observers:
//! - [`NoopObserver`]: ignore everything (poll `status()` instead)
//! - [`EventHandlers`]: closures registered through a builder
//! - [`ChannelObserver`]: forwards [`ConnectionEvent`]s into an mpsc channel
//!
//! Callbacks run on the driver task and must not block.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::ConnectionError;
use crate::message::Message;
use crate::state::{CloseInfo, ConnectionState};

/// Receives lifecycle events and messages for one connection
pub trait ConnectionObserver: Send + Sync {
    /// The transport opened
    fn on_open(&self, _target: &str) {}

    /// A message arrived
    fn on_message(&self, _message: &Message) {}

    /// Something went wrong (connect failure, transport error, exhaustion)
    fn on_error(&self, _error: &ConnectionError) {}

    /// The transport closed
    fn on_close(&self, _close: &CloseInfo) {}

    /// The lifecycle state changed
    fn on_state_change(&self, _from: ConnectionState, _to: ConnectionState) {}
}

/// Observer that ignores every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

/// Type alias for the `on_open` callback
pub type OnOpenCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Type alias for the `on_message` callback
pub type OnMessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Type alias for the `on_error` callback
pub type OnErrorCallback = Arc<dyn Fn(&ConnectionError) + Send + Sync>;

/// Type alias for the `on_close` callback
pub type OnCloseCallback = Arc<dyn Fn(&CloseInfo) + Send + Sync>;

/// Type alias for the `on_state_change` callback
pub type OnStateChangeCallback = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

/// Closure-based observer
///
/// ```
/// use logstream_core::EventHandlers;
///
/// let handlers = EventHandlers::new()
///     .with_message_handler(|msg| println!("{}", msg.display_line()))
///     .with_close_handler(|close| eprintln!("closed: {} ({})", close.reason, close.code));
/// ```
#[derive(Clone, Default)]
pub struct EventHandlers {
    on_open: Option<OnOpenCallback>,
    on_message: Option<OnMessageCallback>,
    on_error: Option<OnErrorCallback>,
    on_close: Option<OnCloseCallback>,
    on_state_change: Option<OnStateChangeCallback>,
}

impl EventHandlers {
    /// Create an empty set of handlers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `on_open` handler
    #[must_use]
    pub fn with_open_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Register the `on_message` handler
    #[must_use]
    pub fn with_message_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Register the `on_error` handler
    #[must_use]
    pub fn with_error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnectionError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register the `on_close` handler
    #[must_use]
    pub fn with_close_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Register the `on_state_change` handler
    #[must_use]
    pub fn with_state_change_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}

impl ConnectionObserver for EventHandlers {
    fn on_open(&self, target: &str) {
        if let Some(cb) = &self.on_open {
            cb(target);
        }
    }

    fn on_message(&self, message: &Message) {
        if let Some(cb) = &self.on_message {
            cb(message);
        }
    }

    fn on_error(&self, error: &ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    fn on_close(&self, close: &CloseInfo) {
        if let Some(cb) = &self.on_close {
            cb(close);
        }
    }

    fn on_state_change(&self, from: ConnectionState, to: ConnectionState) {
        if let Some(cb) = &self.on_state_change {
            cb(from, to);
        }
    }
}

/// Everything an observer can be told, as a value
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// The transport opened to `target`
    Open {
        /// Target address
        target: String,
    },
    /// A message arrived
    Message(Message),
    /// An error was reported
    Error(ConnectionError),
    /// The transport closed
    Close(CloseInfo),
    /// The lifecycle state changed
    StateChanged {
        /// Previous state
        from: ConnectionState,
        /// New state
        to: ConnectionState,
    },
}

/// Observer that forwards events into an unbounded channel
///
/// The channel preserves the driver's ordering. Events sent after the
/// receiver is dropped are discarded.
#[derive(Clone, Debug)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiver for its events
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

impl ConnectionObserver for ChannelObserver {
    fn on_open(&self, target: &str) {
        self.emit(ConnectionEvent::Open {
            target: target.to_string(),
        });
    }

    fn on_message(&self, message: &Message) {
        self.emit(ConnectionEvent::Message(message.clone()));
    }

    fn on_error(&self, error: &ConnectionError) {
        self.emit(ConnectionEvent::Error(error.clone()));
    }

    fn on_close(&self, close: &CloseInfo) {
        self.emit(ConnectionEvent::Close(close.clone()));
    }

    fn on_state_change(&self, from: ConnectionState, to: ConnectionState) {
        self.emit(ConnectionEvent::StateChanged { from, to });
    }
}
