//! Connection Manager
//!
//! Owns one logical subscription to a streaming source. The public
//! [`ConnectionManager`] is a cheap handle; all state lives in a driver task
//! that reacts to three kinds of input, one at a time:
//!
//! - commands from the handle (`connect`, `disconnect`, `send`, ...)
//! - transport events (frames, errors, closure)
//! - timers (retry due, idle read timeout, keepalive ping)
//!
//! Because a single task handles everything, observer callbacks never overlap
//! and always follow the transport's event order.
//!
//! # State Machine
//!
//! ```text
//!                connect()               opened
//! Disconnected ───────────> Connecting ─────────> Connected
//!      ^                       │   ^                  │
//!      │          open failed  │   │ retry due        │ abnormal close
//!      │                       v   │                  v
//!      │  budget spent       ┌──────┐ <────────────────┘
//!      └──────────────────── │Error │
//!                            └──────┘
//! ```
//!
//! A clean close from either side settles in `Disconnected`. `disconnect()`
//! moves any state to `Disconnected`, cancels a pending retry and suppresses
//! further events from the outgoing transport.
//!
//! Every open is tagged with an epoch. `disconnect()` and every new open bump
//! it, so an open or retry that completes after being superseded is discarded.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, TransportError};
use crate::message::{ControlMessage, Message};
use crate::observer::ConnectionObserver;
use crate::scheduler::ScheduledTask;
use crate::state::{CloseInfo, ConnectionState, ConnectionStatus};
use crate::transport::{
    CloseFrame, TransportConnection, TransportConnector, TransportEvent, NORMAL_CLOSURE,
    READ_TIMEOUT_CLOSURE,
};

/// Close reason sent when the consumer calls `disconnect()`
pub const INTENTIONAL_CLOSE_REASON: &str = "client disconnect";

// ============================================================================
// Handle
// ============================================================================

/// Handle to one managed connection
///
/// Dropping the handle tears the connection down as if `disconnect()` had
/// been called.
#[derive(Debug)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    driver: JoinHandle<()>,
}

impl ConnectionManager {
    /// Create a manager and spawn its driver on the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        config: ConnectionConfig,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

        let driver = Driver {
            connector,
            config,
            observer,
            status: status_tx,
            internal_tx,
            transport: None,
            pending_open: None,
            retry: None,
            epoch: 0,
            subscriptions: BTreeSet::new(),
            read_deadline: None,
            ping_deadline: None,
        };

        Self {
            commands: commands_tx,
            status: status_rx,
            driver: tokio::spawn(driver.run(commands_rx, internal_rx)),
        }
    }

    /// Create a manager backed by the WebSocket transport
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn websocket(config: ConnectionConfig, observer: Arc<dyn ConnectionObserver>) -> Self {
        Self::new(
            Arc::new(crate::transport::WebSocketConnector::new()),
            config,
            observer,
        )
    }

    /// Start connecting to `target`
    ///
    /// Returns once the request has been taken up; the state is then
    /// `Connecting` and moves on to `Connected` or `Error` asynchronously.
    /// A no-op when already connected or connecting to the same target.
    /// Connecting to a different target closes the current transport first.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::InvalidTarget`] for an empty target
    /// - [`ConnectionError::Stopped`] if the driver is gone
    pub async fn connect(&self, target: &str) -> Result<(), ConnectionError> {
        if target.trim().is_empty() {
            return Err(ConnectionError::InvalidTarget(
                "target address is empty".to_string(),
            ));
        }

        let (ack, done) = oneshot::channel();
        self.dispatch(Command::Connect {
            target: target.to_string(),
            ack,
        })?;
        done.await.map_err(|_| ConnectionError::Stopped)
    }

    /// Close the connection and stop reconnecting
    ///
    /// Always succeeds; calling it while already disconnected does nothing.
    pub async fn disconnect(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Disconnect { ack }).is_ok() {
            let _ = done.await;
        }
    }

    /// Serialize `payload` as JSON and send it
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::NotConnected`] unless the state is `Connected`
    /// - [`ConnectionError::Serialization`] if `payload` cannot be encoded
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        let text = serde_json::to_string(payload)?;
        self.dispatch(Command::Send { text })
    }

    /// Send a raw text frame
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] unless the state is `Connected`.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.dispatch(Command::Send { text: text.into() })
    }

    /// Ask the server for its view of this connection
    ///
    /// The reply arrives as a `status` message carrying the server-side
    /// connection id and subscribed channels.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] unless the state is `Connected`.
    pub fn request_status(&self) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        let text = ControlMessage::GetStatus.to_frame()?;
        self.dispatch(Command::Send { text })
    }

    /// Join a server-side broadcast channel
    ///
    /// The subscription is remembered and replayed after every (re)open.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Stopped`] if the driver is gone.
    pub fn subscribe(&self, channel: impl Into<String>) -> Result<(), ConnectionError> {
        self.dispatch(Command::Subscribe {
            channel: channel.into(),
        })
    }

    /// Leave a server-side broadcast channel
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Stopped`] if the driver is gone.
    pub fn unsubscribe(&self, channel: impl Into<String>) -> Result<(), ConnectionError> {
        self.dispatch(Command::Unsubscribe {
            channel: channel.into(),
        })
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Snapshot of the connection's status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Wait until the state equals `state`
    ///
    /// Returns immediately when it already does. Intermediate states that
    /// come and go between two polls may be missed; use an observer to see
    /// every transition.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Stopped`] if the driver exits first.
    pub async fn wait_for_state(
        &self,
        state: ConnectionState,
    ) -> Result<ConnectionStatus, ConnectionError> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|s| s.state == state)
            .await
            .map_err(|_| ConnectionError::Stopped)?;
        Ok(status.clone())
    }

    /// Disconnect and wait for the driver task to exit
    pub async fn shutdown(self) {
        let Self {
            commands, driver, ..
        } = self;
        drop(commands);
        if let Err(e) = driver.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Connection driver panicked");
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), ConnectionError> {
        if self.status.borrow().is_connected() {
            Ok(())
        } else {
            tracing::debug!(state = %self.state(), "Send rejected, not connected");
            Err(ConnectionError::NotConnected)
        }
    }

    fn dispatch(&self, command: Command) -> Result<(), ConnectionError> {
        self.commands
            .send(command)
            .map_err(|_| ConnectionError::Stopped)
    }
}

// ============================================================================
// Driver
// ============================================================================

#[derive(Debug)]
enum Command {
    Connect {
        target: String,
        ack: oneshot::Sender<()>,
    },
    Disconnect {
        ack: oneshot::Sender<()>,
    },
    Send {
        text: String,
    },
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
}

enum Internal {
    Opened {
        epoch: u64,
        target: String,
        result: Result<Box<dyn TransportConnection>, TransportError>,
    },
    RetryDue {
        epoch: u64,
    },
}

struct Driver {
    connector: Arc<dyn TransportConnector>,
    config: ConnectionConfig,
    observer: Arc<dyn ConnectionObserver>,
    status: watch::Sender<ConnectionStatus>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    /// At most one open transport per connection
    transport: Option<Box<dyn TransportConnection>>,
    pending_open: Option<JoinHandle<()>>,
    retry: Option<ScheduledTask>,
    epoch: u64,
    subscriptions: BTreeSet<String>,
    read_deadline: Option<Instant>,
    ping_deadline: Option<Instant>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            let read_deadline = self.read_deadline;
            let ping_deadline = self.ping_deadline;

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::debug!("Connection handle dropped, tearing down");
                        self.disconnect().await;
                        break;
                    }
                },

                Some(event) = internal.recv() => self.handle_internal(event).await,

                event = next_event(&mut self.transport) => self.handle_transport_event(event),

                () = sleep_until(read_deadline) => self.handle_read_timeout().await,

                () = sleep_until(ping_deadline) => self.send_ping().await,
            }
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { target, ack } => {
                self.connect(target).await;
                let _ = ack.send(());
            }
            Command::Disconnect { ack } => {
                self.disconnect().await;
                let _ = ack.send(());
            }
            Command::Send { text } => self.send(text).await,
            Command::Subscribe { channel } => {
                if self.subscriptions.insert(channel.clone()) {
                    self.send_control(&ControlMessage::Subscribe { channel }).await;
                }
            }
            Command::Unsubscribe { channel } => {
                if self.subscriptions.remove(&channel) {
                    self.send_control(&ControlMessage::Unsubscribe { channel })
                        .await;
                }
            }
        }
    }

    async fn connect(&mut self, target: String) {
        let same_target = self.status.borrow().target.as_deref() == Some(target.as_str());
        if same_target && self.state().is_active() {
            tracing::debug!(url = %target, "Already connected or connecting");
            return;
        }

        if self.transport.is_some() || self.pending_open.is_some() {
            tracing::info!(url = %target, "Switching target");
            self.epoch += 1;
            self.abort_pending_open();
            if self.close_transport().await {
                self.notify_intentional_close();
            }
        }

        self.cancel_retry();
        self.status.send_modify(|s| {
            s.target = Some(target);
            s.retry_count = 0;
            s.last_error = None;
            s.retries_exhausted = false;
        });
        self.begin_open();
    }

    async fn disconnect(&mut self) {
        self.epoch += 1;
        self.cancel_retry();
        self.abort_pending_open();

        let was_open = self.close_transport().await;

        self.status.send_modify(|s| {
            s.retry_count = 0;
            s.retries_exhausted = false;
        });
        self.set_state(ConnectionState::Disconnected);
        if was_open {
            self.notify_intentional_close();
        }
    }

    async fn send(&mut self, text: String) {
        let Some(transport) = self.transport.as_mut() else {
            // The transport went away after the handle's state check
            self.report_error(ConnectionError::NotConnected);
            return;
        };

        let result = transport.send(text).await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to send frame");
            self.report_error(ConnectionError::SendFailed(e.to_string()));
        }
    }

    async fn send_control(&mut self, control: &ControlMessage) {
        if self.transport.is_none() {
            return;
        }
        match control.to_frame() {
            Ok(frame) => self.send(frame).await,
            Err(e) => self.report_error(ConnectionError::from(e)),
        }
    }

    // ------------------------------------------------------------------------
    // Opening
    // ------------------------------------------------------------------------

    fn begin_open(&mut self) {
        let Some(target) = self.status.borrow().target.clone() else {
            return;
        };

        self.epoch += 1;
        let epoch = self.epoch;
        self.set_state(ConnectionState::Connecting);
        tracing::info!(url = %target, epoch, "Opening connection");

        let connector = Arc::clone(&self.connector);
        let internal_tx = self.internal_tx.clone();
        let timeout = self.config.connect_timeout();

        self.pending_open = Some(tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, connector.open(&target))
                    .await
                    .unwrap_or_else(|_| {
                        Err(TransportError::Timeout(format!(
                            "open did not complete within {}ms",
                            limit.as_millis()
                        )))
                    }),
                None => connector.open(&target).await,
            };
            let _ = internal_tx.send(Internal::Opened {
                epoch,
                target,
                result,
            });
        }));
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Opened {
                epoch,
                target,
                result,
            } => {
                if epoch != self.epoch {
                    tracing::debug!(url = %target, epoch, "Discarding superseded open");
                    if let Ok(mut stale) = result {
                        let _ = stale.close(NORMAL_CLOSURE, "superseded").await;
                    }
                    return;
                }
                self.pending_open = None;
                match result {
                    Ok(transport) => self.on_opened(&target, transport).await,
                    Err(e) => self.on_open_failed(target, &e),
                }
            }
            Internal::RetryDue { epoch } => {
                if epoch != self.epoch || self.retry.take().is_none() {
                    return;
                }
                tracing::info!(
                    attempt = self.status.borrow().retry_count,
                    max_retries = self.config.max_retries,
                    "Reconnecting"
                );
                self.begin_open();
            }
        }
    }

    async fn on_opened(&mut self, target: &str, transport: Box<dyn TransportConnection>) {
        tracing::info!(url = %target, "Connection open");
        self.transport = Some(transport);
        self.status.send_modify(|s| s.retry_count = 0);
        self.set_state(ConnectionState::Connected);
        self.observer.on_open(target);
        self.arm_deadlines();

        let channels: Vec<String> = self.subscriptions.iter().cloned().collect();
        for channel in channels {
            self.send_control(&ControlMessage::Subscribe { channel })
                .await;
        }
    }

    fn on_open_failed(&mut self, target: String, error: &TransportError) {
        tracing::warn!(url = %target, error = %error, "Failed to open connection");
        self.set_state(ConnectionState::Error);
        self.report_error(ConnectionError::ConnectFailure {
            target,
            reason: error.to_string(),
        });

        if self.retry_budget_left() {
            self.schedule_retry();
        } else {
            self.give_up(None);
        }
    }

    // ------------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------------

    fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Text(text)) => self.deliver(&text),
            Some(TransportEvent::Error(e)) => {
                tracing::warn!(error = %e, "Transport error");
                self.report_error(ConnectionError::Transport(e.to_string()));
            }
            Some(TransportEvent::Closed(frame)) => self.on_closed(frame),
            None => self.on_closed(CloseFrame::abnormal("transport ended")),
        }
    }

    fn deliver(&mut self, raw: &str) {
        if let Some(timeout) = self.config.read_timeout() {
            self.read_deadline = Some(Instant::now() + timeout);
        }

        let message = Message::from_frame(raw);
        tracing::trace!(message_type = %message.message_type, "Frame received");
        self.status.send_if_modified(|s| {
            s.last_message = Some(message.clone());
            false
        });
        self.observer.on_message(&message);
    }

    fn on_closed(&mut self, frame: CloseFrame) {
        self.transport = None;
        self.clear_deadlines();

        let close = CloseInfo {
            code: frame.code,
            reason: frame.reason.clone(),
            clean: frame.clean,
            intentional: false,
        };

        if frame.clean {
            tracing::info!(code = frame.code, reason = %frame.reason, "Connection closed");
            self.set_state(ConnectionState::Disconnected);
            self.observer.on_close(&close);
            return;
        }

        tracing::warn!(code = frame.code, reason = %frame.reason, "Connection lost");
        let error = ConnectionError::AbnormalClose {
            code: frame.code,
            reason: frame.reason,
        };
        self.status.send_modify(|s| s.last_error = Some(error));

        if self.retry_budget_left() {
            self.set_state(ConnectionState::Error);
            self.observer.on_close(&close);
            self.schedule_retry();
        } else {
            self.give_up(Some(&close));
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    async fn handle_read_timeout(&mut self) {
        let millis = self.config.read_timeout_ms;
        tracing::warn!(timeout_ms = millis, "No data received, abandoning connection");
        self.report_error(ConnectionError::ReadTimeout { millis });

        if let Some(mut transport) = self.transport.take() {
            let close = transport.close(READ_TIMEOUT_CLOSURE, "read timeout");
            if tokio::time::timeout(self.config.close_timeout(), close)
                .await
                .is_err()
            {
                tracing::debug!("Close handshake timed out");
            }
        }
        self.on_closed(CloseFrame::new(READ_TIMEOUT_CLOSURE, "read timeout"));
    }

    async fn send_ping(&mut self) {
        self.ping_deadline = self
            .config
            .ping_interval()
            .map(|interval| Instant::now() + interval);
        self.send_control(&ControlMessage::Ping).await;
    }

    fn arm_deadlines(&mut self) {
        let now = Instant::now();
        self.read_deadline = self.config.read_timeout().map(|t| now + t);
        self.ping_deadline = self.config.ping_interval().map(|t| now + t);
    }

    fn clear_deadlines(&mut self) {
        self.read_deadline = None;
        self.ping_deadline = None;
    }

    // ------------------------------------------------------------------------
    // Retry
    // ------------------------------------------------------------------------

    fn retry_budget_left(&self) -> bool {
        self.status.borrow().retry_count < self.config.max_retries
    }

    fn schedule_retry(&mut self) {
        let mut attempt = 0;
        self.status.send_modify(|s| {
            s.retry_count += 1;
            attempt = s.retry_count;
        });

        let delay = self.config.retry_delay(attempt);
        let epoch = self.epoch;
        let internal_tx = self.internal_tx.clone();
        tracing::info!(
            attempt,
            max_retries = self.config.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnect"
        );

        self.retry = Some(ScheduledTask::schedule(delay, async move {
            let _ = internal_tx.send(Internal::RetryDue { epoch });
        }));
    }

    fn give_up(&mut self, close: Option<&CloseInfo>) {
        let attempts = self.status.borrow().retry_count;
        tracing::warn!(attempts, "Retry budget exhausted, giving up");

        let error = ConnectionError::RetryExhausted { attempts };
        self.status.send_modify(|s| {
            s.retries_exhausted = true;
            s.last_error = Some(error.clone());
        });
        self.set_state(ConnectionState::Disconnected);
        if let Some(close) = close {
            self.observer.on_close(close);
        }
        self.observer.on_error(&error);
    }

    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            tracing::debug!(
                remaining_ms = u64::try_from(retry.remaining().as_millis()).unwrap_or(u64::MAX),
                "Cancelling pending reconnect"
            );
            retry.cancel();
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    fn set_state(&mut self, to: ConnectionState) {
        let from = self.state();
        if from == to {
            return;
        }
        self.status.send_modify(|s| s.state = to);
        tracing::debug!(from = %from, to = %to, "Connection state changed");
        self.observer.on_state_change(from, to);
    }

    fn report_error(&mut self, error: ConnectionError) {
        self.status
            .send_modify(|s| s.last_error = Some(error.clone()));
        self.observer.on_error(&error);
    }

    fn abort_pending_open(&mut self) {
        if let Some(open) = self.pending_open.take() {
            open.abort();
        }
    }

    /// Close the open transport, if any; returns whether one was open
    async fn close_transport(&mut self) -> bool {
        self.clear_deadlines();
        let Some(mut transport) = self.transport.take() else {
            return false;
        };

        let close = transport.close(NORMAL_CLOSURE, INTENTIONAL_CLOSE_REASON);
        match tokio::time::timeout(self.config.close_timeout(), close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Close handshake failed"),
            Err(_) => tracing::debug!("Close handshake timed out"),
        }
        tracing::info!("Connection closed by client");
        true
    }

    fn notify_intentional_close(&self) {
        self.observer.on_close(&CloseInfo {
            code: NORMAL_CLOSURE,
            reason: INTENTIONAL_CLOSE_REASON.to_string(),
            clean: true,
            intentional: true,
        });
    }
}

async fn next_event(transport: &mut Option<Box<dyn TransportConnection>>) -> Option<TransportEvent> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
