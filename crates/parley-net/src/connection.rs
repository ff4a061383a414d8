//! Connection manager: one live link per authenticated session.
//!
//! The link's events are consumed by a pump task that drives the
//! `Disconnected → Connecting → Connected` state machine and fans decoded
//! server events out to the listener registry. A generation counter is
//! bumped on every teardown so a pump that outlives its link can never
//! deliver another callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_shared::constants::{RECONNECT_ATTEMPTS, RECONNECT_DELAY};
use parley_shared::{ClientEmit, ConnectionState, ConversationId, EventKind, Frame, ServerEvent};

use crate::listeners::{Listener, ListenerRegistry, Subscriptions};
use crate::transport::{ConnectOptions, Transport, TransportEvent};

/// Settings applied to every link the manager opens.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnection_attempts: RECONNECT_ATTEMPTS,
            reconnection_delay: RECONNECT_DELAY,
        }
    }
}

struct ActiveLink {
    generation: u64,
    outbound: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
    pump: JoinHandle<()>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    listeners: ListenerRegistry,
    link: Mutex<Option<ActiveLink>>,
    generation: AtomicU64,
}

/// Cheaply cloneable handle on the single live connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state,
                listeners: ListenerRegistry::new(),
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether a link is currently open (connected or still dialing).
    pub fn has_link(&self) -> bool {
        self.inner.lock_link().is_some()
    }

    /// Open the live link, authenticating with `auth_token` at handshake
    /// time. A second call while a link exists does nothing and returns
    /// `false`.
    pub fn connect(&self, auth_token: &str) -> bool {
        let mut link = self.inner.lock_link();
        if link.is_some() {
            debug!("Live link already open, ignoring connect");
            return false;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let options = ConnectOptions {
            url: self.inner.config.url.clone(),
            auth_token: auth_token.to_string(),
            reconnection_attempts: self.inner.config.reconnection_attempts,
            reconnection_delay: self.inner.config.reconnection_delay,
        };

        info!(url = %options.url, generation, "Opening live connection");
        self.inner.set_state(ConnectionState::Connecting);

        let opened = self.inner.transport.open(options);
        let pump = tokio::spawn(pump(Arc::downgrade(&self.inner), generation, opened.inbound));

        *link = Some(ActiveLink {
            generation,
            outbound: opened.outbound,
            shutdown: opened.shutdown,
            pump,
        });
        true
    }

    /// Close the link and discard every listener. No callback fires after
    /// this returns.
    pub fn teardown(&self) {
        self.inner.close_link();
        self.inner.listeners.clear();
    }

    /// Replace the current link, if any, with a fresh one using
    /// `auth_token`. Listeners stay registered.
    pub fn reconnect(&self, auth_token: &str) -> bool {
        self.inner.close_link();
        self.connect(auth_token)
    }

    /// Emit an event. Not queued: returns `false` and drops it unless the
    /// connection is up.
    pub fn emit(&self, emit: ClientEmit) -> bool {
        if !self.is_connected() {
            debug!(event = emit.name(), conversation = %emit.conversation_id(), "Not connected, dropping emit");
            return false;
        }
        let link = self.inner.lock_link();
        let Some(link) = link.as_ref() else {
            return false;
        };
        match link.outbound.try_send(emit.to_frame()) {
            Ok(()) => true,
            Err(e) => {
                warn!(event = emit.name(), error = %e, "Failed to queue emit");
                false
            }
        }
    }

    pub fn join_conversation(&self, id: &ConversationId) -> bool {
        self.emit(ClientEmit::JoinConversation(id.clone()))
    }

    pub fn leave_conversation(&self, id: &ConversationId) -> bool {
        self.emit(ClientEmit::LeaveConversation(id.clone()))
    }

    pub fn send_typing_start(&self, id: &ConversationId) -> bool {
        self.emit(ClientEmit::TypingStart(id.clone()))
    }

    pub fn send_typing_stop(&self, id: &ConversationId) -> bool {
        self.emit(ClientEmit::TypingStop(id.clone()))
    }

    pub fn mark_conversation_read(&self, id: &ConversationId) -> bool {
        self.emit(ClientEmit::MarkRead(id.clone()))
    }

    pub fn add_event_listener(&self, kind: EventKind, listener: Listener) -> bool {
        self.inner.listeners.add(kind, listener)
    }

    pub fn remove_event_listener(&self, kind: EventKind, listener: &Listener) -> bool {
        self.inner.listeners.remove(kind, listener)
    }

    /// Start a group of listeners removed together.
    pub fn subscriptions(&self) -> Subscriptions {
        self.inner.listeners.subscriptions()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }
}

impl Inner {
    fn lock_link(&self) -> MutexGuard<'_, Option<ActiveLink>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    fn handle(&self, generation: u64, event: TransportEvent) {
        let server_event = match event {
            TransportEvent::Connected => {
                self.set_state(ConnectionState::Connected);
                ServerEvent::Connect
            }
            TransportEvent::Disconnected { reason } => {
                self.set_state(ConnectionState::Disconnected);
                ServerEvent::Disconnect { reason }
            }
            TransportEvent::ConnectError {
                message,
                auth_rejected,
            } => {
                warn!(error = %message, auth_rejected, "Live connection error");
                self.set_state(ConnectionState::Disconnected);
                ServerEvent::ConnectError {
                    message,
                    auth_rejected,
                }
            }
            TransportEvent::Reconnecting { attempt } => {
                debug!(attempt, "Transport reconnecting");
                self.set_state(ConnectionState::Connecting);
                return;
            }
            TransportEvent::Frame(frame) => match ServerEvent::decode(&frame) {
                Ok(event) => event,
                Err(e) => {
                    debug!(event = %frame.event, error = %e, "Ignoring undecodable frame");
                    return;
                }
            },
        };

        for listener in self.listeners.snapshot(server_event.kind()) {
            if !self.is_current(generation) {
                return;
            }
            listener(&server_event);
        }
    }

    fn close_link(&self) {
        let link = self.lock_link().take();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(link) = link {
            info!(generation = link.generation, "Closing live connection");
            link.shutdown.cancel();
            link.pump.abort();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// The transport closed its event channel: it will not reconnect.
    fn link_closed(&self, generation: u64) {
        let mut link = self.lock_link();
        if link.as_ref().map(|l| l.generation) == Some(generation) {
            *link = None;
            drop(link);
            info!(generation, "Live link closed by transport");
            self.set_state(ConnectionState::Disconnected);
        }
    }
}

async fn pump(inner: Weak<Inner>, generation: u64, mut inbound: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.is_current(generation) {
            return;
        }
        inner.handle(generation, event);
    }

    if let Some(inner) = inner.upgrade() {
        inner.link_closed(generation);
    }
}
