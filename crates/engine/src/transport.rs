//! WebSocket transport on tokio-tungstenite.

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::connection::{Connector, FrameSocket};
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Socket = WsSocket;

    async fn open(&mut self, url: &str) -> Result<WsSocket, TransportError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(
            component = "transport",
            event = "transport.handshake",
            status = %response.status(),
            "WebSocket handshake complete"
        );
        Ok(WsSocket { stream })
    }
}

pub struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FrameSocket for WsSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Socket(e.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_string())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        warn!(
                            component = "transport",
                            event = "transport.binary_not_utf8",
                            len = bytes.len(),
                            "Dropping non-UTF-8 binary frame"
                        );
                    }
                },
                Message::Close(frame) => {
                    debug!(
                        component = "transport",
                        event = "transport.close_frame",
                        frame = ?frame,
                        "Peer sent close frame"
                    );
                    return None;
                }
                // Pings are answered by tungstenite on the next read.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(
                component = "transport",
                event = "transport.close_failed",
                error = %e,
                "Error while closing socket"
            );
        }
    }
}

/// Turn the `wsUrl` a session start returns into an absolute `ws://` or
/// `wss://` URL. Relative URLs resolve against the REST base URL.
pub fn resolve_ws_url(base_url: &str, ws_url: &str) -> Result<String, TransportError> {
    let base = Url::parse(base_url)
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", base_url, e)))?;
    let mut url = base
        .join(ws_url)
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", ws_url, e)))?;

    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url.to_string()),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {} in {}",
                other, ws_url
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(ws_url.to_string()))?;
    Ok(url.to_string())
}
