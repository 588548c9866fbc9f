//! WebSocket transport over tokio-tungstenite.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::transport::{Transport, TransportError, TransportKind};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client transport carrying one JSON object per text message.
pub struct WebSocketTransport {
    url: Url,
    socket: Option<Socket>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url.as_str())
            .field("open", &self.socket.is_some())
            .finish()
    }
}

impl WebSocketTransport {
    /// Validate a `ws://` or `wss://` endpoint.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidEndpoint(format!("{url}: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url, socket: None }),
            scheme => Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme {scheme}, expected ws or wss"
            ))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Ok(());
        }
        log::info!("Connecting to {}", self.url);
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        self.socket = Some(socket);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut socket) = self.socket.take() {
            socket
                .close(None)
                .await
                .map_err(|e| TransportError::Send(e.to_string()))?;
        }
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
        socket
            .send(Message::text(frame.to_owned()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        let Some(socket) = self.socket.as_mut() else {
            return Some(Err(TransportError::NotConnected));
        };
        loop {
            let message = socket.next().await;
            match message {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => return Some(Ok(text.to_string())),
                    Err(_) => log::warn!("Dropping non UTF-8 binary message"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    self.socket = None;
                    return None;
                }
                // Ping/Pong are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.socket = None;
                    return Some(Err(TransportError::Receive(e.to_string())));
                }
            }
        }
    }
}
