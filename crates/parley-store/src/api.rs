//! Contracts of the REST collaborator.
//!
//! The store only ever talks to these traits; [`crate::http::HttpApi`] is the
//! production adapter and [`crate::memory::MemoryApi`] the in-process one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parley_shared::{
    Attachment, Conversation, ConversationId, Message, MessageId, MessageKind, Pagination, UserId,
};

use crate::error::ApiResult;

/// One page of message history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    /// 1-based page number; page 1 holds the most recent messages.
    pub page: u32,
    pub limit: u32,
}

/// Body of a message creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub client_message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Authenticated identity as returned by `me()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user: User,
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
}

#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn get_conversations(&self) -> ApiResult<Vec<Conversation>>;

    async fn get_conversation(&self, id: &ConversationId) -> ApiResult<Conversation>;

    async fn get_messages(&self, id: &ConversationId, query: PageQuery) -> ApiResult<MessagePage>;

    async fn send_message(
        &self,
        conversation: &ConversationId,
        message: &OutgoingMessage,
    ) -> ApiResult<Message>;

    async fn edit_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        content: &str,
    ) -> ApiResult<()>;

    async fn delete_message(&self, conversation: &ConversationId, message: &MessageId)
        -> ApiResult<()>;

    async fn add_reaction(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        emoji: &str,
    ) -> ApiResult<()>;

    async fn remove_reaction(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        emoji: &str,
    ) -> ApiResult<()>;

    async fn mark_as_read(&self, conversation: &ConversationId) -> ApiResult<()>;
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange the current session for a fresh access token.
    async fn refresh_token(&self) -> ApiResult<String>;

    async fn me(&self) -> ApiResult<Identity>;
}

/// Supplies the bearer credential attached to outgoing requests.
pub trait BearerSource: Send + Sync {
    fn bearer(&self) -> Option<String>;
}

/// A fixed token, mostly useful for tools and tests.
impl BearerSource for Option<String> {
    fn bearer(&self) -> Option<String> {
        self.clone()
    }
}
