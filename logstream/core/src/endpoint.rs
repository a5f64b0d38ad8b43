//! Log server endpoints
//!
//! The log server exposes one WebSocket route per stream kind. [`Endpoint`]
//! builds the target address for a route from a base URL; `http`/`https`
//! base URLs are mapped to `ws`/`wss`.

use std::fmt;

use crate::error::ConnectionError;

/// A stream the log server can serve
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// General event stream with channel subscriptions
    Events,
    /// Log lines of one container
    ContainerLogs(String),
    /// Output of one image build
    BuildLogs(String),
    /// Periodic Docker system status
    System,
}

impl Endpoint {
    /// Route of this endpoint on the server
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Events => "/api/ws".to_string(),
            Self::ContainerLogs(id) => format!("/api/ws/logs/{id}"),
            Self::BuildLogs(id) => format!("/api/ws/builds/{id}"),
            Self::System => "/api/ws/system".to_string(),
        }
    }

    /// Full target address under `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidTarget`] when the base URL has no
    /// supported scheme or the container/build id is empty or contains `/`.
    pub fn url(&self, base_url: &str) -> Result<String, ConnectionError> {
        if let Self::ContainerLogs(id) | Self::BuildLogs(id) = self {
            if id.is_empty() || id.contains('/') {
                return Err(ConnectionError::InvalidTarget(format!(
                    "invalid stream id {id:?}"
                )));
            }
        }

        let base = base_url.trim().trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            return Err(ConnectionError::InvalidTarget(format!(
                "unsupported base URL {base_url:?}; expected ws://, wss://, http:// or https://"
            )));
        };

        Ok(format!("{base}{}", self.path()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Events => write!(f, "events"),
            Self::ContainerLogs(id) => write!(f, "container {id}"),
            Self::BuildLogs(id) => write!(f, "build {id}"),
            Self::System => write!(f, "system"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_container_logs_url() {
        let url = Endpoint::ContainerLogs("abc123".to_string())
            .url("ws://host:8000")
            .unwrap();
        assert_eq!(url, "ws://host:8000/api/ws/logs/abc123");
    }

    #[test]
    fn test_http_schemes_are_mapped() {
        assert_eq!(
            Endpoint::System.url("http://host/").unwrap(),
            "ws://host/api/ws/system"
        );
        assert_eq!(
            Endpoint::BuildLogs("b-1".to_string())
                .url("https://logs.example.com")
                .unwrap(),
            "wss://logs.example.com/api/ws/builds/b-1"
        );
        assert_eq!(Endpoint::Events.url("wss://h").unwrap(), "wss://h/api/ws");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Endpoint::Events.url("ftp://host").is_err());
        assert!(Endpoint::ContainerLogs(String::new()).url("ws://h").is_err());
        assert!(Endpoint::ContainerLogs("a/b".to_string())
            .url("ws://h")
            .is_err());
    }
}
