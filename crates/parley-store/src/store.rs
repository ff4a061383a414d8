//! Conversation store: conversation list, open conversation history and the
//! REST-backed mutations on them.
//!
//! All state lives behind one mutex that is only held for short,
//! non-awaiting sections. Every REST call runs under a per-call timeout, and
//! responses for a conversation that stopped being active in the meantime
//! are discarded by comparing the generation captured before the call.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_shared::constants::{MESSAGE_PAGE_SIZE, REQUEST_TIMEOUT};
use parley_shared::{Attachment, Conversation, ConversationId, Message, MessageId, MessageKind, UserId};

use crate::api::{MessagingApi, OutgoingMessage, PageQuery};
use crate::conversations::ConversationList;
use crate::error::{ApiResult, Result, StoreError};
use crate::messages::MessageSequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub page_size: u32,
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: MESSAGE_PAGE_SIZE,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Everything the UI renders.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub conversations: ConversationList,
    /// The open conversation, if any.
    pub active: Option<ConversationId>,
    /// Bumped on every change of `active`.
    pub generation: u64,
    /// History of the open conversation, newest first.
    pub messages: MessageSequence,
    /// Last page loaded for the open conversation (0 = none yet).
    pub page: u32,
    pub has_more: bool,
    pub error: Option<String>,
    pub local_user: Option<UserId>,
    in_flight: usize,
}

impl StoreState {
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    pub fn is_active(&self, id: &ConversationId) -> bool {
        self.active.as_ref() == Some(id)
    }

    /// Whether a response started at `generation` for `id` may still be applied.
    pub fn is_current(&self, id: &ConversationId, generation: u64) -> bool {
        self.is_active(id) && self.generation == generation
    }

    fn reset_history(&mut self) {
        self.messages.clear();
        self.page = 0;
        self.has_more = false;
    }
}

struct Shared {
    state: Mutex<StoreState>,
    changes: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch(&self) {
        self.changes.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    fn update<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        let result = {
            let mut state = self.lock();
            f(&mut state)
        };
        self.touch();
        result
    }
}

/// Keeps `loading` raised for as long as it lives.
struct LoadingGuard {
    shared: Arc<Shared>,
}

impl LoadingGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.update(|state| state.in_flight += 1);
        Self {
            shared: shared.clone(),
        }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.shared
            .update(|state| state.in_flight = state.in_flight.saturating_sub(1));
    }
}

/// Cheaply cloneable handle on the store.
#[derive(Clone)]
pub struct ConversationStore {
    api: Arc<dyn MessagingApi>,
    shared: Arc<Shared>,
    config: StoreConfig,
}

impl ConversationStore {
    pub fn new(api: Arc<dyn MessagingApi>, config: StoreConfig) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            api,
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState::default()),
                changes,
            }),
            config,
        }
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    // -- state access ---------------------------------------------------------

    /// Clone of the whole state.
    pub fn snapshot(&self) -> StoreState {
        self.shared.lock().clone()
    }

    /// Apply `f` to the state under the lock and notify watchers.
    pub fn update<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        self.shared.update(f)
    }

    /// Read the state under the lock without notifying.
    pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.shared.lock())
    }

    /// Revision counter bumped after every state change.
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.read(|s| s.conversations.to_vec())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.read(|s| s.messages.to_vec())
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.read(|s| s.active.clone())
    }

    pub fn generation(&self) -> u64 {
        self.read(|s| s.generation)
    }

    pub fn error(&self) -> Option<String> {
        self.read(|s| s.error.clone())
    }

    pub fn is_loading(&self) -> bool {
        self.read(|s| s.is_loading())
    }

    pub fn has_more(&self) -> bool {
        self.read(|s| s.has_more)
    }

    pub fn local_user(&self) -> Option<UserId> {
        self.read(|s| s.local_user.clone())
    }

    pub fn set_local_user(&self, user: Option<UserId>) {
        self.update(|s| s.local_user = user);
    }

    pub fn clear_error(&self) {
        self.update(|s| s.error = None);
    }

    /// Open `id`. Any history of the previous conversation is dropped and
    /// in-flight responses for it become stale. Returns the new generation.
    pub fn set_active(&self, id: ConversationId) -> u64 {
        self.update(|state| {
            state.generation += 1;
            state.active = Some(id);
            state.reset_history();
            state.generation
        })
    }

    pub fn clear_active(&self) {
        self.update(|state| {
            state.generation += 1;
            state.active = None;
            state.reset_history();
        });
    }

    /// Clear the active conversation only if it was set at `generation`.
    pub fn release_active(&self, generation: u64) -> bool {
        self.update(|state| {
            if state.active.is_none() || state.generation != generation {
                return false;
            }
            state.generation += 1;
            state.active = None;
            state.reset_history();
            true
        })
    }

    /// Forget everything (logout).
    pub fn reset(&self) {
        self.update(|state| {
            let generation = state.generation + 1;
            let in_flight = state.in_flight;
            *state = StoreState {
                generation,
                in_flight,
                ..StoreState::default()
            };
        });
    }

    // -- plumbing ---------------------------------------------------------------

    async fn call<T>(&self, request: impl Future<Output = ApiResult<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.request_timeout, request).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.config.request_timeout)),
        }
    }

    /// Record a failure in `error` and hand it back.
    fn fail(&self, operation: &str, err: StoreError) -> StoreError {
        if err.is_user_visible() {
            warn!(operation, error = %err, "store operation failed");
            let message = err.to_string();
            self.update(|s| s.error = Some(message));
        } else {
            debug!(operation, "discarding stale response");
        }
        err
    }

    fn require_active(&self) -> Result<(ConversationId, u64)> {
        self.read(|s| {
            s.active
                .clone()
                .map(|id| (id, s.generation))
                .ok_or(StoreError::NoActiveConversation)
        })
    }

    fn require_confirmed(id: &MessageId) -> Result<()> {
        if id.is_provisional() {
            return Err(StoreError::PendingMessage(id.clone()));
        }
        Ok(())
    }

    // -- fetches ----------------------------------------------------------------

    pub async fn fetch_conversations(&self) -> Result<()> {
        let _loading = LoadingGuard::new(&self.shared);
        let conversations = match self.call(self.api.get_conversations()).await {
            Ok(conversations) => conversations,
            Err(e) => return Err(self.fail("fetch_conversations", e)),
        };
        info!(count = conversations.len(), "conversations loaded");
        self.update(|s| s.conversations.replace_all(conversations));
        Ok(())
    }

    /// Refresh one conversation's summary in the list.
    pub async fn fetch_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let _loading = LoadingGuard::new(&self.shared);
        let conversation = match self.call(self.api.get_conversation(id)).await {
            Ok(conversation) => conversation,
            Err(e) => return Err(self.fail("fetch_conversation", e)),
        };
        self.update(|s| s.conversations.upsert(conversation.clone()));
        Ok(conversation)
    }

    /// Load `page` of the history of `id`. With `append` the page goes to
    /// the tail; otherwise it is merged into the loaded history, keeping
    /// entries that arrived live while the request ran. Returns how many
    /// messages were added.
    pub async fn fetch_messages(&self, id: &ConversationId, page: u32, append: bool) -> Result<usize> {
        let generation = self.read(|s| s.is_active(id).then_some(s.generation));
        let Some(generation) = generation else {
            return Err(self.fail("fetch_messages", StoreError::Stale));
        };

        let _loading = LoadingGuard::new(&self.shared);
        let query = PageQuery {
            page,
            limit: self.config.page_size,
        };
        let result = self.call(self.api.get_messages(id, query)).await;
        let mut fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail("fetch_messages", e)),
        };

        fetched
            .messages
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let has_more = fetched
            .pagination
            .as_ref()
            .and_then(|p| p.has_more_after(page))
            .unwrap_or(fetched.messages.len() >= self.config.page_size as usize);

        let applied = self.update(|state| {
            if !state.is_current(id, generation) {
                return None;
            }
            let added = if append {
                state.messages.append_page(fetched.messages)
            } else {
                state.messages.merge_first_page(fetched.messages)
            };
            state.page = page;
            state.has_more = has_more;
            Some(added)
        });

        match applied {
            Some(added) => {
                debug!(conversation = %id, page, added, has_more, "messages loaded");
                Ok(added)
            }
            None => Err(self.fail("fetch_messages", StoreError::Stale)),
        }
    }

    /// Load the next older page of the open conversation. Does nothing when
    /// everything is loaded or a fetch is already running.
    pub async fn load_more(&self) -> Result<usize> {
        let (id, next) = self.read(|s| {
            let id = s.active.clone().ok_or(StoreError::NoActiveConversation)?;
            Ok::<_, StoreError>((id, (s.has_more && !s.is_loading()).then_some(s.page + 1)))
        })?;
        match next {
            Some(page) => self.fetch_messages(&id, page, true).await,
            None => Ok(0),
        }
    }

    // -- mutations --------------------------------------------------------------

    /// Send a message to the open conversation.
    ///
    /// A provisional copy is shown at the head immediately and the list
    /// preview is updated. The server's answer replaces the provisional
    /// entry in place; a failure removes it and restores the preview.
    pub async fn send_message(
        &self,
        content: String,
        kind: MessageKind,
        attachments: Vec<Attachment>,
    ) -> Result<Message> {
        let (conversation, generation) = self.require_active()?;
        let sender = self.local_user().ok_or(StoreError::NoLocalUser)?;

        let client_message_id = Uuid::new_v4().to_string();
        let provisional = Message::provisional(
            conversation.clone(),
            sender,
            content.clone(),
            kind,
            attachments.clone(),
            client_message_id.clone(),
        );
        let provisional_id = provisional.id.clone();
        let sent_at = provisional.created_at;
        let preview = provisional.preview();

        let previous = self.update(|state| {
            state.messages.insert_head(provisional);
            state
                .conversations
                .record_outgoing(&conversation, preview, sent_at)
        });

        let outgoing = OutgoingMessage {
            content,
            kind,
            attachments,
            client_message_id,
        };
        match self.call(self.api.send_message(&conversation, &outgoing)).await {
            Ok(confirmed) => {
                debug!(conversation = %conversation, message = %confirmed.id, "message sent");
                self.update(|state| {
                    state.conversations.record_outgoing(
                        &conversation,
                        confirmed.preview(),
                        confirmed.created_at,
                    );
                    if state.is_current(&conversation, generation) {
                        state.messages.confirm(&provisional_id, confirmed.clone());
                    }
                });
                Ok(confirmed)
            }
            Err(e) => {
                self.update(|state| {
                    state.messages.remove_provisional(&provisional_id);
                    if let Some(previous) = previous {
                        state
                            .conversations
                            .restore_preview(&conversation, sent_at, previous);
                    }
                });
                Err(self.fail("send_message", e))
            }
        }
    }

    pub async fn edit_message(&self, id: &MessageId, content: &str) -> Result<()> {
        let (conversation, generation) = self.require_active()?;
        Self::require_confirmed(id)?;
        if let Err(e) = self
            .call(self.api.edit_message(&conversation, id, content))
            .await
        {
            return Err(self.fail("edit_message", e));
        }
        self.update(|state| {
            if state.is_current(&conversation, generation) {
                state.messages.apply_edit(id, content, Utc::now());
            }
        });
        Ok(())
    }

    pub async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let (conversation, generation) = self.require_active()?;
        Self::require_confirmed(id)?;
        if let Err(e) = self.call(self.api.delete_message(&conversation, id)).await {
            return Err(self.fail("delete_message", e));
        }
        self.update(|state| {
            if state.is_current(&conversation, generation) {
                state.messages.apply_delete(id, Utc::now());
            }
        });
        Ok(())
    }

    pub async fn add_reaction(&self, id: &MessageId, emoji: &str) -> Result<()> {
        let (conversation, generation) = self.require_active()?;
        Self::require_confirmed(id)?;
        let user = self.local_user().ok_or(StoreError::NoLocalUser)?;
        if let Err(e) = self
            .call(self.api.add_reaction(&conversation, id, emoji))
            .await
        {
            return Err(self.fail("add_reaction", e));
        }
        self.update(|state| {
            if state.is_current(&conversation, generation) {
                state.messages.add_reaction(id, emoji, &user);
            }
        });
        Ok(())
    }

    pub async fn remove_reaction(&self, id: &MessageId, emoji: &str) -> Result<()> {
        let (conversation, generation) = self.require_active()?;
        Self::require_confirmed(id)?;
        let user = self.local_user().ok_or(StoreError::NoLocalUser)?;
        if let Err(e) = self
            .call(self.api.remove_reaction(&conversation, id, emoji))
            .await
        {
            return Err(self.fail("remove_reaction", e));
        }
        self.update(|state| {
            if state.is_current(&conversation, generation) {
                state.messages.remove_reaction(id, emoji, &user);
            }
        });
        Ok(())
    }

    /// Mark the open conversation as read: unread drops to zero and the
    /// local user is recorded as a reader of every loaded message.
    pub async fn mark_as_read(&self) -> Result<()> {
        let (conversation, generation) = self.require_active()?;
        if let Err(e) = self.call(self.api.mark_as_read(&conversation)).await {
            return Err(self.fail("mark_as_read", e));
        }
        self.update(|state| {
            state.conversations.reset_unread(&conversation);
            if !state.is_current(&conversation, generation) {
                return;
            }
            if let Some(user) = state.local_user.clone() {
                state.messages.mark_all_read_by(&user);
            }
        });
        Ok(())
    }
}
