//! The open conversation.
//!
//! A [`ConversationView`] ties together everything scoped to one open
//! conversation: the room membership, the nine conversation listeners, the
//! typing coordinator and the in-flight fetches. Closing it (explicitly or
//! by dropping it) releases all of them at once.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use parley_net::{ConnectionManager, Subscriptions};
use parley_shared::{
    Attachment, ConversationId, EventKind, Message, MessageId, MessageKind, ServerEvent, UserId,
};
use parley_store::{ConversationStore, StoreError};

use crate::error::{ClientError, Result};
use crate::reconciler;
use crate::typing::TypingCoordinator;

pub struct ConversationView {
    id: ConversationId,
    generation: u64,
    store: ConversationStore,
    connection: ConnectionManager,
    typing: TypingCoordinator,
    subscriptions: Subscriptions,
    cancel: CancellationToken,
    closed: bool,
}

impl ConversationView {
    /// Make `id` the active conversation, join its room and start listening.
    /// Does not fetch anything; see [`ConversationView::reload`].
    pub fn open(
        store: ConversationStore,
        connection: ConnectionManager,
        id: ConversationId,
        local_user: Option<UserId>,
    ) -> Self {
        let generation = store.set_active(id.clone());
        connection.join_conversation(&id);

        let typing = TypingCoordinator::new(id.clone(), local_user, connection.clone());
        let mut subscriptions = connection.subscriptions();
        for kind in EventKind::CONVERSATION_SCOPED {
            let store = store.clone();
            let typing = typing.clone();
            let conversation = id.clone();
            subscriptions.on_fn(kind, move |event| {
                on_event(&store, &typing, &conversation, event)
            });
        }
        info!(conversation = %id, generation, "conversation opened");

        Self {
            id,
            generation,
            store,
            connection,
            typing,
            subscriptions,
            cancel: CancellationToken::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the store still shows this view's conversation.
    pub fn is_current(&self) -> bool {
        !self.closed && self.store.read(|s| s.is_current(&self.id, self.generation))
    }

    /// Loaded history, newest first. Empty once the view is no longer
    /// current.
    pub fn messages(&self) -> Vec<Message> {
        self.store.read(|s| {
            if s.is_current(&self.id, self.generation) {
                s.messages.to_vec()
            } else {
                Vec::new()
            }
        })
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    pub fn typing_users(&self) -> Vec<(UserId, String)> {
        self.typing.typing_users()
    }

    pub fn typing_text(&self) -> Option<String> {
        self.typing.typing_text()
    }

    pub fn handle_typing(&self) {
        self.typing.handle_typing();
    }

    pub fn stop_typing(&self) {
        self.typing.stop_typing();
    }

    /// Run `work` unless the view gets closed first.
    async fn guard<T>(&self, work: impl Future<Output = std::result::Result<T, StoreError>>) -> Result<T> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Closed),
            result = work => result.map_err(ClientError::from),
        }
    }

    /// Fetch the conversation summary and the first page of history.
    pub async fn reload(&self) -> Result<()> {
        self.guard(async {
            let (conversation, messages) = tokio::join!(
                self.store.fetch_conversation(&self.id),
                self.store.fetch_messages(&self.id, 1, false),
            );
            conversation?;
            messages?;
            Ok::<(), StoreError>(())
        })
        .await
    }

    /// Load the next older page. Returns how many messages were added.
    pub async fn load_more(&self) -> Result<usize> {
        self.guard(self.store.load_more()).await
    }

    /// Send a message. Outgoing typing stops first.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        kind: MessageKind,
        attachments: Vec<Attachment>,
    ) -> Result<Message> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        self.typing.stop_typing();
        Ok(self
            .store
            .send_message(content.into(), kind, attachments)
            .await?)
    }

    pub async fn send_text(&self, content: impl Into<String>) -> Result<Message> {
        self.send_message(content, MessageKind::Text, Vec::new()).await
    }

    pub async fn edit_message(&self, id: &MessageId, content: &str) -> Result<()> {
        Ok(self.store.edit_message(id, content).await?)
    }

    pub async fn delete_message(&self, id: &MessageId) -> Result<()> {
        Ok(self.store.delete_message(id).await?)
    }

    pub async fn add_reaction(&self, id: &MessageId, emoji: &str) -> Result<()> {
        Ok(self.store.add_reaction(id, emoji).await?)
    }

    pub async fn remove_reaction(&self, id: &MessageId, emoji: &str) -> Result<()> {
        Ok(self.store.remove_reaction(id, emoji).await?)
    }

    /// Mark everything as read on the server, tell the other side, and
    /// update the local unread count and read receipts.
    pub async fn mark_as_read(&self) -> Result<()> {
        self.store.mark_as_read().await?;
        self.connection.mark_conversation_read(&self.id);
        Ok(())
    }

    /// Release everything tied to this conversation. Idempotent; also runs
    /// on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.typing.close();
        self.subscriptions.cancel();
        let released = self.store.release_active(self.generation);
        // A newer view of the same conversation still needs the room.
        let reopened = !released && self.store.active_conversation().as_ref() == Some(&self.id);
        if !reopened {
            self.connection.leave_conversation(&self.id);
        }
        debug!(conversation = %self.id, released, reopened, "conversation closed");
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        self.close();
    }
}

fn on_event(
    store: &ConversationStore,
    typing: &TypingCoordinator,
    conversation: &ConversationId,
    event: &ServerEvent,
) {
    match event {
        ServerEvent::UserTyping(e) if &e.conversation_id == conversation => {
            typing.on_typing_start(e.user_id.clone(), e.user_name.clone());
        }
        ServerEvent::UserStoppedTyping(e) if &e.conversation_id == conversation => {
            typing.on_typing_stop(&e.user_id);
        }
        ServerEvent::PresenceChange(e) => {
            if !e.status.is_online() {
                typing.on_typing_stop(&e.user_id);
            }
        }
        _ if event.conversation_id() == Some(conversation) => {
            store.update(|state| reconciler::apply_to_active(state, event));
        }
        _ => {}
    }
}
