//! In-process REST collaborator.
//!
//! Holds conversations and messages in memory and answers the same calls the
//! HTTP adapter does. Failures and latency can be injected per call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use parley_shared::{
    Conversation, ConversationId, Message, MessageId, MessageKind, Pagination, Participant,
    UserId,
};

use crate::api::{
    AuthApi, Identity, MessagePage, MessagingApi, OutgoingMessage, PageQuery, User,
};
use crate::error::{ApiError, ApiResult};

#[derive(Default)]
struct State {
    conversations: Vec<Conversation>,
    /// Per conversation, oldest first.
    messages: HashMap<ConversationId, Vec<Message>>,
    sent: Vec<OutgoingMessage>,
    calls: Vec<String>,
    failures: VecDeque<ApiError>,
    latency: Option<Duration>,
    next_id: u64,
    refresh_results: VecDeque<ApiResult<String>>,
    refresh_calls: usize,
    identity: Option<Identity>,
}

#[derive(Default)]
pub struct MemoryApi {
    state: Mutex<State>,
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- seeding ----------------------------------------------------------------

    pub fn add_conversation(&self, id: &str, peer_name: &str) {
        let conversation = Conversation {
            id: ConversationId::from(id),
            participant: Participant {
                id: UserId::from(format!("user-{id}")),
                name: peer_name.to_string(),
                avatar: None,
            },
            last_message: None,
            last_message_at: None,
            unread_count: 0,
        };
        self.lock().conversations.push(conversation);
    }

    pub fn set_unread(&self, id: &str, unread: u32) {
        let id = ConversationId::from(id);
        if let Some(c) = self.lock().conversations.iter_mut().find(|c| c.id == id) {
            c.unread_count = unread;
        }
    }

    /// Add `count` messages from the conversation's participant, one minute
    /// apart.
    pub fn seed_messages(&self, id: &str, count: usize) {
        let conversation = ConversationId::from(id);
        let mut state = self.lock();
        let sender = state
            .conversations
            .iter()
            .find(|c| c.id == conversation)
            .map(|c| c.participant.id.clone())
            .unwrap_or_else(|| UserId::from("someone"));
        for _ in 0..count {
            state.next_id += 1;
            let n = state.next_id;
            let message = Message {
                id: MessageId::new(format!("srv-{n}")),
                conversation_id: conversation.clone(),
                sender_id: sender.clone(),
                content: format!("message {n}"),
                kind: MessageKind::Text,
                attachments: Vec::new(),
                created_at: base_time() + chrono::Duration::minutes(n as i64),
                is_edited: false,
                edited_at: None,
                is_deleted: false,
                deleted_at: None,
                reactions: Default::default(),
                read_by: Default::default(),
                client_message_id: None,
                delivery: Default::default(),
            };
            state.messages.entry(conversation.clone()).or_default().push(message);
        }
    }

    pub fn set_identity(&self, id: &str, name: &str) {
        self.lock().identity = Some(Identity {
            user: User {
                id: UserId::from(id),
                name: name.to_string(),
                email: None,
                role: None,
            },
            profile: None,
        });
    }

    // -- injection --------------------------------------------------------------

    /// Make the next messaging call fail with `error`.
    pub fn fail_next(&self, error: ApiError) {
        self.lock().failures.push_back(error);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Queue the result of the next `refresh_token` call. With an empty
    /// queue refreshes fail with `Unauthorized`.
    pub fn push_refresh(&self, result: ApiResult<String>) {
        self.lock().refresh_results.push_back(result);
    }

    // -- inspection -------------------------------------------------------------

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn sent_messages(&self) -> Vec<OutgoingMessage> {
        self.lock().sent.clone()
    }

    pub fn refresh_calls(&self) -> usize {
        self.lock().refresh_calls
    }

    // -- internals --------------------------------------------------------------

    async fn begin(&self, call: String) -> ApiResult<()> {
        let (latency, failure) = {
            let mut state = self.lock();
            state.calls.push(call);
            (state.latency, state.failures.pop_front())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn with_message<R>(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        f: impl FnOnce(&mut Message) -> R,
    ) -> ApiResult<R> {
        let mut state = self.lock();
        state
            .messages
            .get_mut(conversation)
            .and_then(|messages| messages.iter_mut().find(|m| &m.id == message))
            .map(f)
            .ok_or(ApiError::NotFound)
    }

    fn me_id(&self) -> UserId {
        self.lock()
            .identity
            .as_ref()
            .map(|i| i.user.id.clone())
            .unwrap_or_else(|| UserId::from("me"))
    }
}

#[async_trait]
impl MessagingApi for MemoryApi {
    async fn get_conversations(&self) -> ApiResult<Vec<Conversation>> {
        self.begin("get_conversations".into()).await?;
        Ok(self.lock().conversations.clone())
    }

    async fn get_conversation(&self, id: &ConversationId) -> ApiResult<Conversation> {
        self.begin(format!("get_conversation {id}")).await?;
        self.lock()
            .conversations
            .iter()
            .find(|c| &c.id == id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn get_messages(&self, id: &ConversationId, query: PageQuery) -> ApiResult<MessagePage> {
        self.begin(format!("get_messages {id} {}", query.page)).await?;
        let state = self.lock();
        let all = state.messages.get(id).cloned().unwrap_or_default();
        let limit = query.limit.max(1) as usize;
        let total = all.len();
        let pages = total.div_ceil(limit) as u32;
        let skip = (query.page.saturating_sub(1) as usize) * limit;
        // Page 1 is the most recent slice, served oldest first like the server.
        let end = total.saturating_sub(skip);
        let start = end.saturating_sub(limit);
        Ok(MessagePage {
            messages: all[start..end].to_vec(),
            pagination: Some(Pagination {
                page: Some(query.page),
                limit: Some(query.limit),
                total: Some(total as u64),
                pages: Some(pages),
                has_more: None,
            }),
        })
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        message: &OutgoingMessage,
    ) -> ApiResult<Message> {
        self.begin(format!("send_message {conversation}")).await?;
        let sender = self.me_id();
        let mut state = self.lock();
        if !state.conversations.iter().any(|c| &c.id == conversation) {
            return Err(ApiError::NotFound);
        }
        state.next_id += 1;
        let created = Message {
            id: MessageId::new(format!("srv-{}", state.next_id)),
            conversation_id: conversation.clone(),
            sender_id: sender,
            content: message.content.clone(),
            kind: message.kind,
            attachments: message.attachments.clone(),
            created_at: Utc::now(),
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            reactions: Default::default(),
            read_by: Default::default(),
            client_message_id: Some(message.client_message_id.clone()),
            delivery: Default::default(),
        };
        state.sent.push(message.clone());
        state
            .messages
            .entry(conversation.clone())
            .or_default()
            .push(created.clone());
        if let Some(c) = state.conversations.iter_mut().find(|c| &c.id == conversation) {
            c.last_message = Some(created.preview());
            c.last_message_at = Some(created.created_at);
        }
        Ok(created)
    }

    async fn edit_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        content: &str,
    ) -> ApiResult<()> {
        self.begin(format!("edit_message {message}")).await?;
        self.with_message(conversation, message, |m| m.apply_edit(content, Utc::now()))
    }

    async fn delete_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
    ) -> ApiResult<()> {
        self.begin(format!("delete_message {message}")).await?;
        self.with_message(conversation, message, |m| m.apply_delete(Utc::now()))
    }

    async fn add_reaction(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        emoji: &str,
    ) -> ApiResult<()> {
        self.begin(format!("add_reaction {message} {emoji}")).await?;
        let me = self.me_id();
        self.with_message(conversation, message, |m| {
            m.add_reaction(emoji, &me);
        })
    }

    async fn remove_reaction(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        emoji: &str,
    ) -> ApiResult<()> {
        self.begin(format!("remove_reaction {message} {emoji}")).await?;
        let me = self.me_id();
        self.with_message(conversation, message, |m| {
            m.remove_reaction(emoji, &me);
        })
    }

    async fn mark_as_read(&self, conversation: &ConversationId) -> ApiResult<()> {
        self.begin(format!("mark_as_read {conversation}")).await?;
        let me = self.me_id();
        let mut state = self.lock();
        if let Some(c) = state.conversations.iter_mut().find(|c| &c.id == conversation) {
            c.unread_count = 0;
        }
        for message in state.messages.entry(conversation.clone()).or_default() {
            message.mark_read_by(&me);
        }
        Ok(())
    }
}

#[async_trait]
impl AuthApi for MemoryApi {
    async fn refresh_token(&self) -> ApiResult<String> {
        let latency = {
            let mut state = self.lock();
            state.refresh_calls += 1;
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.lock()
            .refresh_results
            .pop_front()
            .unwrap_or(Err(ApiError::Unauthorized))
    }

    async fn me(&self) -> ApiResult<Identity> {
        self.lock().identity.clone().ok_or(ApiError::Unauthorized)
    }
}
