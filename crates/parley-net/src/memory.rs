//! In-process transport. Every opened link is handed to the paired
//! [`MemoryServer`], which plays the remote end.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_shared::Frame;

use crate::transport::{ConnectOptions, Transport, TransportEvent, TransportLink, LINK_CHANNEL_CAPACITY};

#[derive(Clone)]
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { accepted: tx }, MemoryServer { accepted: rx })
    }
}

impl Transport for MemoryTransport {
    fn open(&self, options: ConnectOptions) -> TransportLink {
        let (outbound_tx, outbound_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let peer = MemoryPeer {
            options,
            events: event_tx,
            emitted: outbound_rx,
            shutdown: shutdown.clone(),
        };
        if self.accepted.send(peer).is_err() {
            tracing::debug!("Memory server dropped, link will never connect");
        }

        TransportLink {
            outbound: outbound_tx,
            inbound: event_rx,
            shutdown,
        }
    }
}

/// Receives the links opened through the paired [`MemoryTransport`].
pub struct MemoryServer {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }

    /// Next link if one was already opened.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.try_recv().ok()
    }
}

/// Remote end of one link.
pub struct MemoryPeer {
    pub options: ConnectOptions,
    events: mpsc::Sender<TransportEvent>,
    emitted: mpsc::Receiver<Frame>,
    shutdown: CancellationToken,
}

impl MemoryPeer {
    pub async fn send(&self, event: TransportEvent) {
        let _ = self.events.send(event).await;
    }

    /// Acknowledge the handshake.
    pub async fn connect(&self) {
        self.send(TransportEvent::Connected).await;
    }

    pub async fn disconnect(&self, reason: &str) {
        self.send(TransportEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await;
    }

    /// Push a named event with a JSON payload.
    pub async fn push(&self, event: &str, data: serde_json::Value) {
        self.send(TransportEvent::Frame(Frame::new(event, data))).await;
    }

    /// Frames emitted by the client so far.
    pub fn drain_emitted(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.emitted.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Wait up to `timeout` for the next emitted frame.
    pub async fn next_emitted(&mut self, timeout: Duration) -> Option<Frame> {
        tokio::time::timeout(timeout, self.emitted.recv())
            .await
            .ok()
            .flatten()
    }

    /// Whether the client side shut this link down.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
