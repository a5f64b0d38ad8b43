//! Connection Registry
//!
//! An explicit map from connection identifier to [`ConnectionManager`],
//! owned by whichever component manages log subscriptions (a log viewer
//! with several container panes, for example). Each entry is independent:
//! its own transport, retry state and observer.
//!
//! # Thread Safety
//!
//! The map sits behind `Arc<RwLock<>>`; clones of the registry share it.
//! The lock is never held across an await point, so managers are removed
//! from the map before they are shut down.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::manager::ConnectionManager;
use crate::observer::ConnectionObserver;
use crate::state::{ConnectionState, ConnectionStatus};
use crate::transport::TransportConnector;

/// Identifier of a registered connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a random identifier (`conn_` followed by 16 hex digits)
    #[must_use]
    pub fn new() -> Self {
        let bytes: [u8; 8] = rand::random();
        Self(format!("conn_{}", hex::encode(bytes)))
    }

    /// The identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry of independent managed connections
#[derive(Clone)]
pub struct ConnectionRegistry {
    connector: Arc<dyn TransportConnector>,
    config: ConnectionConfig,
    inner: Arc<RwLock<HashMap<ConnectionId, ConnectionManager>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry whose connections use `connector` and `config`
    #[must_use]
    pub fn new(connector: Arc<dyn TransportConnector>, config: ConnectionConfig) -> Self {
        Self {
            connector,
            config,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a manager for `target`, start connecting and register it
    ///
    /// # Errors
    ///
    /// Returns the error from [`ConnectionManager::connect`]; nothing is
    /// registered in that case.
    pub async fn open(
        &self,
        target: &str,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<ConnectionId, ConnectionError> {
        let id = ConnectionId::new();
        self.open_as(id.clone(), target, observer).await?;
        Ok(id)
    }

    /// Like [`ConnectionRegistry::open`] with a caller-chosen identifier
    ///
    /// An existing connection under the same identifier is shut down and
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns the error from [`ConnectionManager::connect`].
    pub async fn open_as(
        &self,
        id: ConnectionId,
        target: &str,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<(), ConnectionError> {
        let manager =
            ConnectionManager::new(Arc::clone(&self.connector), self.config.clone(), observer);
        if let Err(e) = manager.connect(target).await {
            manager.shutdown().await;
            return Err(e);
        }

        tracing::debug!(connection_id = %id, url = %target, "Registered connection");
        if let Some(previous) = self.insert(id, manager) {
            previous.shutdown().await;
        }
        Ok(())
    }

    /// Register an existing manager, returning the one it replaced
    pub fn insert(&self, id: ConnectionId, manager: ConnectionManager) -> Option<ConnectionManager> {
        self.inner.write().insert(id, manager)
    }

    /// Status snapshot of a connection
    #[must_use]
    pub fn status(&self, id: &ConnectionId) -> Option<ConnectionStatus> {
        self.inner.read().get(id).map(ConnectionManager::status)
    }

    /// Lifecycle state of a connection
    #[must_use]
    pub fn state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.inner.read().get(id).map(ConnectionManager::state)
    }

    /// Send a JSON payload on a connection
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] for an unknown identifier,
    /// otherwise the error from [`ConnectionManager::send`].
    pub fn send<T: Serialize + ?Sized>(
        &self,
        id: &ConnectionId,
        payload: &T,
    ) -> Result<(), ConnectionError> {
        match self.inner.read().get(id) {
            Some(manager) => manager.send(payload),
            None => Err(ConnectionError::NotConnected),
        }
    }

    /// Disconnect and remove a connection
    ///
    /// Returns `false` if the identifier was unknown.
    pub async fn disconnect(&self, id: &ConnectionId) -> bool {
        let removed = self.inner.write().remove(id);
        match removed {
            Some(manager) => {
                manager.disconnect().await;
                manager.shutdown().await;
                tracing::debug!(connection_id = %id, "Removed connection");
                true
            }
            None => false,
        }
    }

    /// Disconnect and remove every connection
    pub async fn disconnect_all(&self) {
        let drained: Vec<ConnectionManager> = self.inner.write().drain().map(|(_, m)| m).collect();
        for manager in drained {
            manager.disconnect().await;
            manager.shutdown().await;
        }
    }

    /// Number of registered connections
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Identifiers of all registered connections, sorted
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.inner.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use crate::transport::InProcessConnector;

    #[test]
    fn test_connection_id_format() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"));
        assert_eq!(id.as_str().len(), "conn_".len() + 16);
        assert_ne!(id, ConnectionId::new());
    }

    #[test]
    fn test_connection_id_from_string() {
        let id = ConnectionId::from("logs-abc");
        assert_eq!(id.to_string(), "logs-abc");
    }

    #[tokio::test]
    async fn test_open_and_disconnect() {
        let (connector, mut listener) = InProcessConnector::new();
        let registry = ConnectionRegistry::new(Arc::new(connector), ConnectionConfig::default());

        let id = registry
            .open("mem://logs/abc", Arc::new(NoopObserver))
            .await
            .unwrap();
        let _peer = listener.accept().await.unwrap();
        assert!(registry.contains(&id));
        assert_eq!(registry.count(), 1);

        assert!(registry.disconnect(&id).await);
        assert!(!registry.contains(&id));
        assert!(!registry.disconnect(&id).await);
    }

    #[tokio::test]
    async fn test_invalid_target_is_not_registered() {
        let (connector, _listener) = InProcessConnector::new();
        let registry = ConnectionRegistry::new(Arc::new(connector), ConnectionConfig::default());

        let result = registry.open("", Arc::new(NoopObserver)).await;
        assert!(matches!(result, Err(ConnectionError::InvalidTarget(_))));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_unknown_id() {
        let (connector, _listener) = InProcessConnector::new();
        let registry = ConnectionRegistry::new(Arc::new(connector), ConnectionConfig::default());
        assert_eq!(
            registry.send(&ConnectionId::from("missing"), "x"),
            Err(ConnectionError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let (connector, mut listener) = InProcessConnector::new();
        let registry = ConnectionRegistry::new(Arc::new(connector), ConnectionConfig::default());
        let clone = registry.clone();

        registry
            .open_as(ConnectionId::from("a"), "mem://a", Arc::new(NoopObserver))
            .await
            .unwrap();
        registry
            .open_as(ConnectionId::from("b"), "mem://b", Arc::new(NoopObserver))
            .await
            .unwrap();
        let _a = listener.accept().await.unwrap();
        let _b = listener.accept().await.unwrap();

        assert_eq!(
            clone.connection_ids(),
            vec![ConnectionId::from("a"), ConnectionId::from("b")]
        );

        clone.disconnect_all().await;
        assert_eq!(registry.count(), 0);
    }
}
