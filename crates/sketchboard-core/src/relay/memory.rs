//! In-process transport backed by channels.

use tokio::sync::mpsc;

use super::transport::{Transport, TransportError, TransportKind};

/// Transport whose far end is a [`MemoryPeer`] held by the caller.
#[derive(Debug)]
pub struct MemoryTransport {
    kind: TransportKind,
    open: bool,
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
}

/// The far end of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Create a transport that reports itself as `kind`, plus its far end.
    pub fn pair(kind: TransportKind) -> (MemoryTransport, MemoryPeer) {
        let (to_peer, from_transport) = mpsc::unbounded_channel();
        let (to_transport, from_peer) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                kind,
                open: false,
                outgoing: to_peer,
                incoming: from_peer,
            },
            MemoryPeer {
                tx: to_transport,
                rx: from_transport,
            },
        )
    }
}

impl MemoryPeer {
    /// Deliver a frame to the transport. Returns false if it was dropped.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.tx.send(frame.into()).is_ok()
    }

    /// Wait for the next frame written by the transport.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Everything written so far.
    pub fn drain(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.outgoing.is_closed() {
            return Err(TransportError::Connect("peer dropped".into()));
        }
        self.open = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        self.outgoing
            .send(frame.to_string())
            .map_err(|_| TransportError::Closed)
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        if !self.open {
            return Some(Err(TransportError::NotConnected));
        }
        match self.incoming.recv().await {
            Some(frame) => Some(Ok(frame)),
            None => {
                self.open = false;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (mut transport, mut peer) = MemoryTransport::pair(TransportKind::Stream);
        assert!(matches!(transport.send("x").await, Err(TransportError::NotConnected)));

        transport.connect().await.unwrap();
        transport.send("hello").await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("hello"));

        assert!(peer.send("world"));
        assert_eq!(transport.next_frame().await.unwrap().unwrap(), "world");
    }

    #[tokio::test]
    async fn test_dropped_peer_closes() {
        let (mut transport, peer) = MemoryTransport::pair(TransportKind::WebSocket);
        transport.connect().await.unwrap();
        drop(peer);
        assert!(transport.next_frame().await.is_none());
        assert!(!transport.is_open());
        assert!(transport.connect().await.is_err());
    }
}
