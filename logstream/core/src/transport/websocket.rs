//! WebSocket Transport
//!
//! Client connections to a remote log server over `ws://` or `wss://`,
//! built on `tokio-tungstenite`. Binary frames holding UTF-8 are delivered
//! as text; ping and pong frames are answered by tungstenite and never
//! surface.

use std::borrow::Cow;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;

use super::{
    CloseFrame, TransportConnection, TransportConnector, TransportEvent, NO_STATUS_RECEIVED,
};

/// Opens WebSocket connections
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn open(&self, target: &str) -> Result<Box<dyn TransportConnection>, TransportError> {
        let (stream, response) = connect_async(target)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{target}: {e}")))?;

        tracing::debug!(
            url = %target,
            status = %response.status(),
            "WebSocket handshake complete"
        );

        Ok(Box::new(WebSocketConnection {
            stream,
            pending_close: None,
            finished: false,
        }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending_close: Option<CloseFrame>,
    finished: bool,
}

#[async_trait]
impl TransportConnection for WebSocketConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.finished {
            return Err(TransportError::ConnectionClosed);
        }
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        if let Some(close) = self.pending_close.take() {
            self.finished = true;
            return Some(TransportEvent::Closed(close));
        }
        if self.finished {
            return None;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(TransportEvent::Text(text)),
                Some(Ok(WsMessage::Binary(bytes))) => {
                    return Some(match String::from_utf8(bytes) {
                        Ok(text) => TransportEvent::Text(text),
                        Err(_) => TransportEvent::Error(TransportError::Protocol(
                            "binary frame is not valid UTF-8".to_string(),
                        )),
                    });
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    self.finished = true;
                    let close = match frame {
                        Some(f) => CloseFrame::new(u16::from(f.code), f.reason.into_owned()),
                        None => CloseFrame::new(NO_STATUS_RECEIVED, ""),
                    };
                    return Some(TransportEvent::Closed(close));
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "WebSocket read failed");
                    self.pending_close = Some(CloseFrame::abnormal(e.to_string()));
                    return Some(TransportEvent::Error(TransportError::Protocol(e.to_string())));
                }
                None => {
                    self.finished = true;
                    return Some(TransportEvent::Closed(CloseFrame::abnormal(
                        "stream ended without close frame",
                    )));
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.stream
            .close(Some(WsCloseFrame {
                code: CloseCode::from(code),
                reason: Cow::Owned(reason.to_string()),
            }))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}
