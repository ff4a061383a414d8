//! Typing indicators for one open conversation.
//!
//! Outgoing: `typing_start` is throttled and followed by `typing_stop` once
//! the local user goes idle. Incoming: every entry expires on its own timer
//! unless refreshed; a timer only removes the entry if no newer signal
//! arrived in the meantime. All timers belong to one [`TypingCoordinator`]
//! and die with it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use parley_net::ConnectionManager;
use parley_shared::constants::{TYPING_EXPIRY, TYPING_IDLE_STOP, TYPING_THROTTLE};
use parley_shared::{ConversationId, UserId};

#[derive(Debug, Clone)]
struct TypingEntry {
    name: String,
    last_signal: Instant,
}

/// Who is typing, with the instant of their last signal.
#[derive(Debug, Clone, Default)]
pub struct TypingState {
    entries: HashMap<UserId, TypingEntry>,
}

impl TypingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, user: UserId, name: String, now: Instant) {
        self.entries.insert(
            user,
            TypingEntry {
                name,
                last_signal: now,
            },
        );
    }

    pub fn remove(&mut self, user: &UserId) -> bool {
        self.entries.remove(user).is_some()
    }

    pub fn is_fresh(&self, user: &UserId, now: Instant) -> bool {
        self.entries
            .get(user)
            .is_some_and(|e| now.saturating_duration_since(e.last_signal) < TYPING_EXPIRY)
    }

    /// Remove `user` only if their last signal is older than the expiry
    /// window.
    pub fn purge_if_stale(&mut self, user: &UserId, now: Instant) -> bool {
        if self.entries.contains_key(user) && !self.is_fresh(user, now) {
            self.entries.remove(user);
            return true;
        }
        false
    }

    /// Fresh typers other than `local`, earliest signal first.
    pub fn users(&self, now: Instant, local: Option<&UserId>) -> Vec<(UserId, String)> {
        let mut fresh: Vec<_> = self
            .entries
            .iter()
            .filter(|(id, _)| Some(*id) != local)
            .filter(|(_, e)| now.saturating_duration_since(e.last_signal) < TYPING_EXPIRY)
            .collect();
        fresh.sort_by(|a, b| a.1.last_signal.cmp(&b.1.last_signal).then(a.0.cmp(b.0)));
        fresh
            .into_iter()
            .map(|(id, e)| (id.clone(), e.name.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Human-readable indicator for the given typers.
pub fn typing_text(names: &[String]) -> Option<String> {
    match names {
        [] => None,
        [one] => Some(format!("{one} is typing...")),
        [first, second] => Some(format!("{first} and {second} are typing...")),
        _ => Some("Several people are typing...".to_string()),
    }
}

#[derive(Default)]
struct CoordinatorState {
    typing: TypingState,
    expiry: HashMap<UserId, JoinHandle<()>>,
    last_start: Option<Instant>,
    idle_stop: Option<JoinHandle<()>>,
    closed: bool,
}

impl CoordinatorState {
    fn abort_timers(&mut self) {
        for (_, timer) in self.expiry.drain() {
            timer.abort();
        }
        if let Some(timer) = self.idle_stop.take() {
            timer.abort();
        }
    }
}

struct Inner {
    conversation: ConversationId,
    local_user: Option<UserId>,
    connection: ConnectionManager,
    state: Mutex<CoordinatorState>,
    changes: watch::Sender<u64>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .abort_timers();
    }
}

/// Typing state and timers of one open conversation.
#[derive(Clone)]
pub struct TypingCoordinator {
    inner: Arc<Inner>,
}

impl TypingCoordinator {
    pub fn new(
        conversation: ConversationId,
        local_user: Option<UserId>,
        connection: ConnectionManager,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                conversation,
                local_user,
                connection,
                state: Mutex::new(CoordinatorState::default()),
                changes,
            }),
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.inner.conversation
    }

    /// Revision counter bumped whenever the typing set changes.
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    // -- outgoing ---------------------------------------------------------------

    /// Call on every keystroke.
    pub fn handle_typing(&self) {
        let now = Instant::now();
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }

        let throttled = state
            .last_start
            .is_some_and(|at| now.saturating_duration_since(at) < TYPING_THROTTLE);
        if !throttled {
            self.inner.connection.send_typing_start(&self.inner.conversation);
            state.last_start = Some(now);
        }

        if let Some(timer) = state.idle_stop.take() {
            timer.abort();
        }
        let weak = Arc::downgrade(&self.inner);
        state.idle_stop = Some(tokio::spawn(async move {
            tokio::time::sleep(TYPING_IDLE_STOP).await;
            if let Some(inner) = weak.upgrade() {
                inner.idle_stop_fired();
            }
        }));
    }

    /// Emit `typing_stop` now if the local user was typing.
    pub fn stop_typing(&self) {
        let mut state = self.inner.lock();
        if let Some(timer) = state.idle_stop.take() {
            timer.abort();
        }
        if state.last_start.take().is_some() {
            self.inner.connection.send_typing_stop(&self.inner.conversation);
        }
    }

    // -- incoming ---------------------------------------------------------------

    pub fn on_typing_start(&self, user: UserId, name: Option<String>) {
        if self.inner.local_user.as_ref() == Some(&user) {
            return;
        }
        // Typing payloads carry no timestamp; the receive time stamps the entry.
        let now = Instant::now();
        {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            let name = name.unwrap_or_else(|| user.to_string());
            state.typing.upsert(user.clone(), name, now);

            let weak = Arc::downgrade(&self.inner);
            let timer_user = user.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(TYPING_EXPIRY).await;
                if let Some(inner) = weak.upgrade() {
                    inner.expire(&timer_user);
                }
            });
            if let Some(previous) = state.expiry.insert(user, timer) {
                previous.abort();
            }
        }
        self.inner.notify();
    }

    /// Drop `user` right away (typing stopped, or they went offline).
    pub fn on_typing_stop(&self, user: &UserId) {
        let removed = {
            let mut state = self.inner.lock();
            if let Some(timer) = state.expiry.remove(user) {
                timer.abort();
            }
            state.typing.remove(user)
        };
        if removed {
            self.inner.notify();
        }
    }

    pub fn typing_users(&self) -> Vec<(UserId, String)> {
        self.inner
            .lock()
            .typing
            .users(Instant::now(), self.inner.local_user.as_ref())
    }

    pub fn typing_text(&self) -> Option<String> {
        let names: Vec<String> = self.typing_users().into_iter().map(|(_, name)| name).collect();
        typing_text(&names)
    }

    /// Stop every timer and forget all typers. Idempotent.
    pub fn close(&self) {
        let was_typing = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.abort_timers();
            state.typing.clear();
            state.last_start.take().is_some()
        };
        if was_typing {
            self.inner.connection.send_typing_stop(&self.inner.conversation);
        }
        debug!(conversation = %self.inner.conversation, "typing coordinator closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        self.changes.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    fn idle_stop_fired(&self) {
        let mut state = self.lock();
        state.idle_stop = None;
        if state.last_start.take().is_some() && !state.closed {
            self.connection.send_typing_stop(&self.conversation);
        }
    }

    fn expire(&self, user: &UserId) {
        let removed = {
            let mut state = self.lock();
            let removed = state.typing.purge_if_stale(user, Instant::now());
            if removed {
                state.expiry.remove(user);
            }
            removed
        };
        if removed {
            debug!(user = %user, "typing indicator expired");
            self.notify();
        }
    }
}
