//! Session: an authenticated identity plus at most one live connection.
//!
//! The session owns the long-lived pieces (store, connection, credential
//! manager, presence) and keeps them consistent with the credential
//! lifecycle. A supervisor task follows credential events and connection
//! state: a logout tears everything down, a renewal reconnects a dropped
//! link, and every (re)connection rejoins the open conversation's room.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_net::{ConnectionManager, Subscriptions, Transport, WsTransport};
use parley_shared::{ConnectionState, ConversationId, EventKind, ServerEvent, UserId};
use parley_store::{ApiError, AuthApi, ConversationStore, HttpApi, Identity, MessagingApi};

use crate::auth::{AuthEvent, CredentialManager};
use crate::config::ClientConfig;
use crate::conversation::ConversationView;
use crate::credentials::{CredentialSlot, CredentialStore, FileCredentialStore};
use crate::error::{ClientError, Result};
use crate::presence::PresenceTracker;
use crate::reconciler::{self, ListUpdate};

struct SessionInner {
    config: ClientConfig,
    store: ConversationStore,
    connection: ConnectionManager,
    credentials: CredentialManager,
    auth_api: Arc<dyn AuthApi>,
    presence: PresenceTracker,
    identity: Mutex<Option<Identity>>,
    listeners: Mutex<Option<Subscriptions>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable handle on the client session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(
        config: ClientConfig,
        api: Arc<dyn MessagingApi>,
        auth_api: Arc<dyn AuthApi>,
        transport: Arc<dyn Transport>,
        credentials: CredentialManager,
    ) -> Self {
        let store = ConversationStore::new(api, config.store_config());
        let connection = ConnectionManager::new(transport, config.connection_config());
        Self {
            inner: Arc::new(SessionInner {
                config,
                store,
                connection,
                credentials,
                auth_api,
                presence: PresenceTracker::new(),
                identity: Mutex::new(None),
                listeners: Mutex::new(None),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Production wiring: REST over HTTP, live link over WebSocket,
    /// credential in a file.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let slot = CredentialSlot::new();
        let http = Arc::new(HttpApi::new(&config.api_url, Arc::new(slot.clone()))?);
        let credential_store: Arc<dyn CredentialStore> = match &config.credential_path {
            Some(path) => Arc::new(FileCredentialStore::at(path.clone())),
            None => Arc::new(FileCredentialStore::new()?),
        };
        let credentials = CredentialManager::new(http.clone(), credential_store, slot);
        Ok(Self::new(
            config,
            http.clone(),
            http,
            Arc::new(WsTransport),
            credentials,
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &ConversationStore {
        &self.inner.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.inner.credentials
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.inner.presence
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.lock_identity().clone()
    }

    pub fn local_user(&self) -> Option<UserId> {
        self.inner.lock_identity().as_ref().map(|i| i.user.id.clone())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch_state()
    }

    pub fn is_user_online(&self, user: &UserId) -> bool {
        self.inner.presence.is_user_online(user)
    }

    /// Log in with a freshly issued token.
    pub async fn login(&self, token: impl Into<String>) -> Result<Identity> {
        self.inner.credentials.set_credential(token)?;
        self.establish().await
    }

    /// Pick up the persisted credential, if there is one.
    pub async fn resume(&self) -> Result<Option<Identity>> {
        if self.inner.credentials.restore()?.is_none() {
            debug!("no persisted credential");
            return Ok(None);
        }
        self.establish().await.map(Some)
    }

    async fn establish(&self) -> Result<Identity> {
        self.ensure_supervisor();

        let timeout = self.inner.config.request_timeout;
        let identity = match tokio::time::timeout(timeout, self.inner.auth_api.me()).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(ApiError::Unauthorized)) => {
                warn!("credential refused while resolving identity");
                self.logout();
                return Err(ApiError::Unauthorized.into());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ClientError::Timeout(timeout)),
        };

        info!(user = %identity.user.id, "session established");
        self.inner
            .store
            .set_local_user(Some(identity.user.id.clone()));
        *self.inner.lock_identity() = Some(identity.clone());

        self.inner.connect();
        if let Err(e) = self.inner.store.fetch_conversations().await {
            debug!(error = %e, "initial conversation fetch failed");
        }
        Ok(identity)
    }

    /// Open the live connection if the session is authenticated and no link
    /// exists.
    pub fn connect(&self) -> bool {
        self.inner.connect()
    }

    /// Drop the live connection and every listener on it.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn logout(&self) {
        self.inner.credentials.logout();
        self.inner.on_logged_out();
    }

    /// Open `id`: it becomes the active conversation, its room is joined
    /// and the first page of history is loaded. A failed load is recorded in
    /// the store and does not fail the open.
    pub async fn open_conversation(
        &self,
        id: impl Into<ConversationId>,
    ) -> Result<ConversationView> {
        let local_user = self.local_user().ok_or(ClientError::NotLoggedIn)?;
        let view = ConversationView::open(
            self.inner.store.clone(),
            self.inner.connection.clone(),
            id.into(),
            Some(local_user),
        );
        if let Err(e) = view.reload().await {
            debug!(conversation = %view.id(), error = %e, "initial load failed");
        }
        Ok(view)
    }

    fn ensure_supervisor(&self) {
        let mut slot = self.inner.lock_supervisor();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let events = self.inner.credentials.subscribe();
        let state = self.inner.connection.watch_state();
        *slot = Some(tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            events,
            state,
        )));
    }
}

impl SessionInner {
    fn lock_identity(&self) -> MutexGuard<'_, Option<Identity>> {
        self.identity.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Option<Subscriptions>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_supervisor(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.supervisor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn connect_token(&self) -> Option<String> {
        if self.lock_identity().is_none() {
            debug!("no identity, not connecting");
            return None;
        }
        let token = self.credentials.token();
        if token.is_none() {
            debug!("no credential, not connecting");
        }
        token
    }

    fn connect(&self) -> bool {
        let Some(token) = self.connect_token() else {
            return false;
        };
        if self.connection.has_link() {
            return false;
        }

        let listeners = self.session_listeners();
        if let Some(mut previous) = self.lock_listeners().replace(listeners) {
            previous.cancel();
        }
        self.connection.connect(&token)
    }

    /// Swap the link for one using the current credential. Session
    /// listeners are kept if registered.
    fn reconnect(&self) -> bool {
        let Some(token) = self.connect_token() else {
            return false;
        };
        let mut listeners = self.lock_listeners();
        if listeners.is_none() {
            *listeners = Some(self.session_listeners());
        }
        drop(listeners);
        self.connection.reconnect(&token)
    }

    fn disconnect(&self) {
        if let Some(mut listeners) = self.lock_listeners().take() {
            listeners.cancel();
        }
        self.connection.teardown();
    }

    /// Listeners living as long as the connection: list-level message
    /// effects, presence, and credential rejection.
    fn session_listeners(&self) -> Subscriptions {
        let mut subscriptions = self.connection.subscriptions();

        let store = self.store.clone();
        subscriptions.on_fn(EventKind::NewMessage, move |event| {
            let ServerEvent::NewMessage(e) = event else {
                return;
            };
            let update = store.update(|state| reconciler::apply_to_list(state, e));
            if update == ListUpdate::UnknownConversation {
                debug!(conversation = %e.conversation_id, "message for unknown conversation, refetching list");
                let store = store.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.fetch_conversations().await {
                        debug!(error = %e, "conversation refetch failed");
                    }
                });
            }
        });

        for kind in [
            EventKind::UserOnline,
            EventKind::UserOffline,
            EventKind::PresenceChange,
        ] {
            let presence = self.presence.clone();
            subscriptions.on_fn(kind, move |event| {
                presence.apply(event);
            });
        }

        let credentials = self.credentials.clone();
        subscriptions.on_fn(EventKind::ConnectError, move |event| {
            if let ServerEvent::ConnectError {
                auth_rejected: true,
                ..
            } = event
            {
                warn!("server rejected the credential, renewing");
                credentials.renew_now();
            }
        });

        subscriptions
    }

    fn on_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::LoggedOut => self.on_logged_out(),
            AuthEvent::Renewed => {
                if !self.connection.is_connected() && self.reconnect() {
                    info!("reconnecting with renewed credential");
                }
            }
            AuthEvent::RenewalFailed { reason } => {
                warn!(reason = %reason, "credential renewal failed");
            }
        }
    }

    /// Idempotent.
    fn on_logged_out(&self) {
        self.disconnect();
        self.store.reset();
        self.presence.clear();
        if self.lock_identity().take().is_some() {
            info!("session ended");
        }
    }

    fn rejoin_active(&self) {
        if let Some(id) = self.store.active_conversation() {
            debug!(conversation = %id, "rejoining active conversation");
            self.connection.join_conversation(&id);
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(task) = self.lock_supervisor().take() {
            task.abort();
        }
        self.disconnect();
    }
}

async fn supervise(
    inner: Weak<SessionInner>,
    mut events: broadcast::Receiver<AuthEvent>,
    mut state: watch::Receiver<ConnectionState>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    inner.on_auth_event(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth events lagged");
                }
                Err(RecvError::Closed) => return,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    return;
                }
                let connected = state.borrow_and_update().is_connected();
                if connected {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    inner.rejoin_active();
                }
            }
        }
    }
}
