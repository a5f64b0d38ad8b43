//! Logstream Core - Reconnecting Log Stream Connections
//!
//! This crate maintains live subscriptions to streaming log sources (container
//! logs, build output, system status) and delivers their messages to a
//! consumer in order, recovering from dropped connections within a bounded
//! retry budget.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Consumer                               │
//! │   connect() / disconnect() / send()        ConnectionObserver  │
//! └───────────────┬─────────────────────────────────────▲─────────┘
//!                 │ commands                            │ callbacks
//! ┌───────────────▼─────────────────────────────────────┴─────────┐
//! │                    ConnectionManager (driver task)             │
//! │   state machine ── retry (ScheduledTask) ── read/ping timers   │
//! └───────────────┬───────────────────────────────────────────────┘
//!                 │ TransportConnector / TransportConnection
//! ┌───────────────▼───────────────────────────────────────────────┐
//! │        WebSocketConnector            InProcessConnector        │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ConnectionManager`]: one managed connection
//! - [`ConnectionObserver`]: receives messages and lifecycle events
//! - [`Message`]: one delivered unit of data
//! - [`ConnectionConfig`]: retry, timeout and keepalive settings
//! - [`ConnectionRegistry`]: many independent connections by identifier
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use logstream_core::{ConnectionConfig, ConnectionManager, Endpoint, EventHandlers};
//!
//! #[tokio::main]
//! async fn main() {
//!     let observer = EventHandlers::new()
//!         .with_message_handler(|msg| println!("{}", msg.display_line()))
//!         .with_close_handler(|close| eprintln!("closed ({})", close.code));
//!
//!     let manager = ConnectionManager::websocket(ConnectionConfig::from_env(), Arc::new(observer));
//!     let target = Endpoint::ContainerLogs("abc123".into()).url("ws://localhost:8000").unwrap();
//!     manager.connect(&target).await.unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     manager.disconnect().await;
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`manager`]: connection state machine and driver
//! - [`observer`]: observer trait and ready-made observers
//! - [`message`]: inbound message parsing and outbound control frames
//! - [`transport`]: transport traits, WebSocket and in-process transports
//! - [`scheduler`]: cancellable delayed tasks (reconnect timers)
//! - [`config`]: configuration and TOML/env loading
//! - [`registry`]: identifier-to-connection map
//! - [`endpoint`]: log server routes

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod manager;
pub mod message;
pub mod observer;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConnectionConfig,
    LoadedConfig, LogstreamToml,
};
pub use endpoint::Endpoint;
pub use error::{ConnectionError, TransportError};
pub use manager::{ConnectionManager, INTENTIONAL_CLOSE_REASON};
pub use message::{ControlMessage, Message, MessageKind, DEFAULT_MESSAGE_TYPE};
pub use observer::{
    ChannelObserver, ConnectionEvent, ConnectionObserver, EventHandlers, NoopObserver,
};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use scheduler::ScheduledTask;
pub use state::{CloseInfo, ConnectionState, ConnectionStatus};

// Transport exports
pub use transport::{
    CloseFrame, InProcessConnector, InProcessListener, InProcessPeer, TransportConnection,
    TransportConnector, TransportEvent,
};
#[cfg(feature = "websocket")]
pub use transport::WebSocketConnector;
