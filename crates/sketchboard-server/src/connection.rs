//! Per-connection protocol: register, history, then relay until close.

use axum::extract::ws::{Message, WebSocket};
use sketchboard_core::relay::{Transport, TransportError, TransportKind};
use sketchboard_core::wire::{Frame, parse_frames};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::{Broadcast, Hub, Reply};

/// Server side of an axum WebSocket.
pub struct WsConnection {
    socket: Option<WebSocket>,
}

impl WsConnection {
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket: Some(socket),
        }
    }
}

impl Transport for WsConnection {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.socket.is_none() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut socket) = self.socket.take() {
            socket
                .send(Message::Close(None))
                .await
                .map_err(|e| TransportError::Send(e.to_string()))?;
        }
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
        socket
            .send(Message::Text(frame.to_owned().into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        let Some(socket) = self.socket.as_mut() else {
            return Some(Err(TransportError::NotConnected));
        };
        loop {
            let message = socket.recv().await;
            match message {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => return Some(Ok(text.to_owned())),
                    Err(_) => warn!("Dropping non UTF-8 binary message"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    self.socket = None;
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.socket = None;
                    return Some(Err(TransportError::Receive(e.to_string())));
                }
            }
        }
    }
}

/// Why a connection was refused at registration.
#[derive(Debug, PartialEq, Eq)]
pub enum RegisterError {
    /// The peer closed before registering.
    Closed,
    Rejected(String),
}

/// Wait for the first frame and require it to be `register`.
pub async fn await_register<T: Transport>(transport: &mut T) -> Result<String, RegisterError> {
    let text = match transport.next_frame().await {
        Some(Ok(text)) => text,
        Some(Err(e)) => return Err(RegisterError::Rejected(e.to_string())),
        None => return Err(RegisterError::Closed),
    };
    let mut frames = parse_frames(&text).into_iter();
    match (frames.next(), frames.next()) {
        (Some(Ok(Frame::Register { canvas_id })), None) if !canvas_id.is_empty() => Ok(canvas_id),
        (Some(Err(e)), _) => Err(RegisterError::Rejected(format!("invalid register message: {e}"))),
        _ => Err(RegisterError::Rejected(
            "first message must be {\"type\":\"register\",\"canvas_id\":...}".to_string(),
        )),
    }
}

/// Run one client connection to completion.
pub async fn serve_connection<T: Transport>(hub: Arc<Hub>, mut transport: T) {
    let conn = Uuid::new_v4();
    let kind = transport.kind();
    if let Err(e) = transport.connect().await {
        warn!("Connection {conn} failed to open: {e}");
        return;
    }
    info!("New {kind} connection: {conn}");

    let canvas_id = match await_register(&mut transport).await {
        Ok(canvas_id) => canvas_id,
        Err(RegisterError::Closed) => {
            info!("Connection {conn} closed before registering");
            return;
        }
        Err(RegisterError::Rejected(message)) => {
            warn!("Rejecting {conn}: {message}");
            if let Ok(frame) = (Frame::Error { message }).to_json() {
                transport.send(&frame).await.ok();
            }
            transport.disconnect().await.ok();
            return;
        }
    };

    let (mut room, history) = hub.join(&canvas_id).await;
    info!("Connection {conn} registered for canvas {canvas_id} ({} history events)", history.len());
    let sent = match serde_json::to_string(&history) {
        Ok(history) => transport.send(&history).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode history for {canvas_id}: {e}");
            false
        }
    };

    if sent {
        relay_frames(&hub, &canvas_id, conn, &mut transport, &mut room).await;
    }

    hub.leave(&canvas_id);
    transport.disconnect().await.ok();
    info!("Connection closed: {conn}");
}

/// Relay between the client and its room until either side closes.
async fn relay_frames<T: Transport>(
    hub: &Hub,
    canvas_id: &str,
    conn: Uuid,
    transport: &mut T,
    room: &mut broadcast::Receiver<Broadcast>,
) {
    loop {
        tokio::select! {
            frame = transport.next_frame() => match frame {
                Some(Ok(text)) => {
                    for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
                        if let Reply::Send(reply) = hub.publish(canvas_id, conn, line).await {
                            if transport.send(&reply).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Connection {conn} failed: {e}");
                    return;
                }
                None => return,
            },
            message = room.recv() => match message {
                Ok(message) if message.from != conn => {
                    debug!("-> {conn}: {}", message.frame);
                    if transport.send(&message.frame).await.is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Connection {conn} lagged, {skipped} frames skipped");
                }
                Err(RecvError::Closed) => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchboard_core::relay::StreamTransport;
    use sketchboard_core::{DomainEvent, ShapeId};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    struct Client {
        lines: tokio::io::Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
        writer: tokio::io::WriteHalf<DuplexStream>,
    }

    impl Client {
        fn connect(hub: &Arc<Hub>) -> Self {
            let (client, server) = tokio::io::duplex(4096);
            tokio::spawn(serve_connection(hub.clone(), StreamTransport::from_stream(server)));
            let (reader, writer) = tokio::io::split(client);
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn next(&mut self) -> Option<String> {
            self.lines.next_line().await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_register_required() {
        let hub = Arc::new(Hub::new(10, None));
        let mut client = Client::connect(&hub);
        client.send(r#"{"type":"REDRAW","payload":{}}"#).await;
        let error = client.next().await.unwrap();
        assert!(error.starts_with(r#"{"error":"#));
        assert_eq!(client.next().await, None);
    }

    #[tokio::test]
    async fn test_history_then_relay_without_echo() {
        let hub = Arc::new(Hub::new(10, None));
        let event = DomainEvent::remove_shape(ShapeId::from("a:0")).with_timestamp(1);
        let line = event.to_json().unwrap();

        let mut alice = Client::connect(&hub);
        alice.send(r#"{"command":"register","canvas_id":"c1"}"#).await;
        assert_eq!(alice.next().await.unwrap(), "[]");
        alice.send(&line).await;

        // Wait until the event is recorded before bob joins.
        while hub.history("c1").is_empty() {
            tokio::task::yield_now().await;
        }
        let mut bob = Client::connect(&hub);
        bob.send(r#"{"type":"register","canvas_id":"c1"}"#).await;
        let history: Vec<String> = serde_json::from_str(&bob.next().await.unwrap()).unwrap();
        assert_eq!(history, vec![line.clone()]);

        let second = DomainEvent::remove_shape(ShapeId::from("b:0")).with_timestamp(2);
        bob.send(&second.to_json().unwrap()).await;
        assert_eq!(alice.next().await.unwrap(), second.to_json().unwrap());

        // A ping gets a pong; bob never hears his own event back.
        bob.send(r#"{"type":"PING","canvas_id":"c1"}"#).await;
        assert_eq!(bob.next().await.unwrap(), r#"{"type":"PONG","canvas_id":"c1"}"#);
    }
}
