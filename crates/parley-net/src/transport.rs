//! Seam between the connection manager and whatever actually carries frames.
//!
//! A transport runs its own task per link. The manager talks to it through
//! typed channels: frames go *into* the link, [`TransportEvent`]s come *out*.
//! Reconnection is the transport's job and is configured once, when the
//! link is opened.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_shared::constants::{RECONNECT_ATTEMPTS, RECONNECT_DELAY};
use parley_shared::Frame;

/// Capacity of the frame and event channels of a link.
pub const LINK_CHANNEL_CAPACITY: usize = 256;

/// Options fixed at link creation.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Endpoint of the live connection.
    pub url: String,
    /// Bearer credential presented once, during the handshake.
    pub auth_token: String,
    /// How many times the transport re-dials after losing the connection.
    pub reconnection_attempts: u32,
    /// Fixed delay between re-dials.
    pub reconnection_delay: Duration,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: auth_token.into(),
            reconnection_attempts: RECONNECT_ATTEMPTS,
            reconnection_delay: RECONNECT_DELAY,
        }
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("url", &self.url)
            .field("auth_token", &"<redacted>")
            .field("reconnection_attempts", &self.reconnection_attempts)
            .field("reconnection_delay", &self.reconnection_delay)
            .finish()
    }
}

/// Lifecycle notifications and frames emitted by a link.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake acknowledged.
    Connected,
    /// An established connection dropped.
    Disconnected { reason: String },
    /// A handshake attempt failed.
    ConnectError { message: String, auth_rejected: bool },
    /// The transport is about to re-dial.
    Reconnecting { attempt: u32 },
    /// An inbound frame.
    Frame(Frame),
}

/// Handle on one open link. Dropping `inbound` on the transport side (the
/// channel closing) means the link gave up for good.
pub struct TransportLink {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
    pub shutdown: CancellationToken,
}

/// Something that can open live links.
pub trait Transport: Send + Sync + 'static {
    /// Start a link in the background. Must be called inside a tokio runtime.
    fn open(&self, options: ConnectOptions) -> TransportLink;
}
