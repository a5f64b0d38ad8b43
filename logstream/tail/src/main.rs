//! Logstream Tail - Follow Log Streams From the Terminal
//!
//! Connects to a log server stream and prints every message to stdout,
//! reconnecting on dropped connections until the retry budget is spent.
//! Diagnostics go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Follow a container's logs
//! logstream-tail --container abc123 --base-url http://localhost:8000
//!
//! # Follow an image build as JSON
//! logstream-tail --build b-42 --json
//!
//! # Event stream with channel subscriptions
//! logstream-tail --url ws://localhost:8000/api/ws --subscribe container_events
//!
//! # Verbose logging
//! RUST_LOG=debug logstream-tail --system
//! ```
//!
//! # Exit Status
//!
//! - `0`: the server closed the stream cleanly, or Ctrl-C
//! - `1`: retries exhausted, or a configuration error

mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use logstream_core::{
    default_config_path, load_config_from_path, ChannelObserver, ConnectionConfig,
    ConnectionError, ConnectionEvent, ConnectionManager, Endpoint,
};

/// Fallback when neither flag, environment nor config file names a server
const DEFAULT_BASE_URL: &str = "ws://localhost:8000";

/// Logstream Tail - follow container, build and system streams
#[derive(Parser, Debug)]
#[command(name = "logstream-tail")]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["container", "build", "system", "url"])
))]
pub struct Args {
    /// Follow the logs of a container
    #[arg(long, value_name = "ID")]
    container: Option<String>,

    /// Follow the output of an image build
    #[arg(long, value_name = "ID")]
    build: Option<String>,

    /// Follow periodic system status
    #[arg(long)]
    system: bool,

    /// Connect to an explicit WebSocket address
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Base URL of the log server
    #[arg(short = 'b', long, env = "LOGSTREAM_BASE_URL", value_name = "URL")]
    base_url: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "LOGSTREAM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Reconnect attempts after a dropped connection
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Delay before each reconnect attempt, in milliseconds
    #[arg(long, value_name = "MS")]
    retry_delay_ms: Option<u64>,

    /// Treat the stream as dead after this much silence, in milliseconds
    #[arg(long, value_name = "MS")]
    read_timeout_ms: Option<u64>,

    /// Join a broadcast channel (repeatable)
    #[arg(short = 's', long = "subscribe", value_name = "CHANNEL")]
    subscribe: Vec<String>,

    /// Print each message as a JSON object
    #[arg(long)]
    json: bool,

    /// Ask the server for connection status after every open
    #[arg(long)]
    status: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "LOGSTREAM_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    /// The stream selected on the command line
    fn endpoint(&self) -> Option<Endpoint> {
        if let Some(id) = &self.container {
            Some(Endpoint::ContainerLogs(id.clone()))
        } else if let Some(id) = &self.build {
            Some(Endpoint::BuildLogs(id.clone()))
        } else if self.system {
            Some(Endpoint::System)
        } else {
            None
        }
    }

    /// Apply retry and timeout flags on top of the loaded settings
    fn apply_overrides(&self, config: &mut ConnectionConfig) {
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry_delay_ms = delay;
        }
        if let Some(timeout) = self.read_timeout_ms {
            config.read_timeout_ms = timeout;
        }
    }
}

/// Resolve the address to connect to
///
/// An explicit `--url` wins; otherwise the selected endpoint is placed
/// under the base URL.
fn resolve_target(args: &Args, base_url: Option<&str>) -> Result<String> {
    if let Some(url) = &args.url {
        return Ok(url.clone());
    }

    let endpoint = args
        .endpoint()
        .context("one of --container, --build, --system or --url is required")?;
    let base = base_url.unwrap_or(DEFAULT_BASE_URL);
    endpoint
        .url(base)
        .with_context(|| format!("cannot build the {endpoint} address"))
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "logstream_tail={level},logstream_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// How the tail session ended
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    /// Server closed the stream cleanly
    Finished,
    /// Ctrl-C
    Interrupted,
    /// Reconnect budget spent
    Exhausted(ConnectionError),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let config_path = args.config.clone().or_else(default_config_path);
    let loaded = tokio::task::spawn_blocking(move || load_config_from_path(config_path))
        .await
        .context("Configuration loader panicked")?
        .context("Failed to load configuration")?;

    let mut config = loaded.connection;
    args.apply_overrides(&mut config);
    config
        .validate()
        .context("Invalid connection settings")?;

    let base_url = args.base_url.clone().or(loaded.base_url);
    let target = resolve_target(&args, base_url.as_deref())?;

    info!(version = env!("CARGO_PKG_VERSION"), url = %target, "Logstream tail starting");

    let (observer, mut events) = ChannelObserver::new();
    let manager = ConnectionManager::websocket(config, Arc::new(observer));

    for channel in &args.subscribe {
        manager
            .subscribe(channel.clone())
            .context("Connection driver stopped")?;
    }
    manager
        .connect(&target)
        .await
        .with_context(|| format!("Failed to connect to {target}"))?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut stdout = tokio::io::stdout();
    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, closing stream");
                break Outcome::Interrupted;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break Outcome::Finished;
                };
                match event {
                    ConnectionEvent::Message(message) => {
                        if let Some(line) = render::format_message(&message, args.json) {
                            let written = stdout.write_all(format!("{line}\n").as_bytes()).await;
                            if written.is_err() {
                                // Reader went away (e.g. `| head`)
                                break Outcome::Interrupted;
                            }
                        }
                    }
                    ConnectionEvent::Open { target } => {
                        info!(url = %target, "Stream open");
                        if args.status {
                            if let Err(e) = manager.request_status() {
                                warn!(error = %e, "Status request failed");
                            }
                        }
                    }
                    ConnectionEvent::Close(close) => {
                        if close.clean && !close.intentional {
                            info!(code = close.code, reason = %close.reason, "Stream finished");
                            break Outcome::Finished;
                        }
                        if !close.clean {
                            warn!(code = close.code, reason = %close.reason, "Stream dropped");
                        }
                    }
                    ConnectionEvent::Error(error @ ConnectionError::RetryExhausted { .. }) => {
                        break Outcome::Exhausted(error);
                    }
                    ConnectionEvent::Error(error) => {
                        warn!(error = %error, "Stream error");
                    }
                    ConnectionEvent::StateChanged { .. } => {}
                }
            }
        }
    };
    let _ = stdout.flush().await;

    manager.disconnect().await;
    manager.shutdown().await;

    match outcome {
        Outcome::Finished | Outcome::Interrupted => Ok(()),
        Outcome::Exhausted(error) => bail!("{error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("logstream-tail").chain(argv.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_container_under_base_url() {
        let args = parse(&["--container", "abc123"]);
        assert_eq!(
            resolve_target(&args, Some("http://logs:8000/")).unwrap(),
            "ws://logs:8000/api/ws/logs/abc123"
        );
    }

    #[test]
    fn test_default_base_url() {
        let args = parse(&["--system"]);
        assert_eq!(
            resolve_target(&args, None).unwrap(),
            "ws://localhost:8000/api/ws/system"
        );
    }

    #[test]
    fn test_explicit_url_wins() {
        let args = parse(&["--url", "wss://example.com/stream"]);
        assert_eq!(
            resolve_target(&args, Some("ws://ignored")).unwrap(),
            "wss://example.com/stream"
        );
    }

    #[test]
    fn test_sources_are_exclusive() {
        let result = Args::try_parse_from(["logstream-tail", "--system", "--build", "b1"]);
        assert!(result.is_err());

        let result = Args::try_parse_from(["logstream-tail", "--json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_replace_loaded_values() {
        let args = parse(&[
            "--build",
            "b1",
            "--max-retries",
            "2",
            "--retry-delay-ms",
            "500",
            "--subscribe",
            "builds",
            "-s",
            "system",
        ]);
        let mut config = ConnectionConfig::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay(1), Duration::from_millis(500));
        assert_eq!(config.read_timeout_ms, 0);
        assert_eq!(args.subscribe, vec!["builds", "system"]);
        assert!(!args.status);
    }

    #[test]
    fn test_status_flag() {
        let args = parse(&["--url", "ws://h/api/ws", "--status"]);
        assert!(args.status);
    }
}
