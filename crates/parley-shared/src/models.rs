//! Domain models shared by the REST adapter, the live protocol and the
//! in-memory store.
//!
//! Field names follow the server's camelCase JSON. Every optional field has
//! a serde default so partially populated payloads still decode.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// The counterpart of a two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// A conversation as shown in the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participant: Participant,
    /// Preview of the most recent message.
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
    #[serde(other)]
    Unknown,
}

/// Attachment descriptor. Content encoding is the server's business; the
/// client only carries the reference around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Local delivery state. Never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryState {
    #[default]
    Sent,
    /// Inserted optimistically, waiting for the server to confirm.
    Pending,
}

/// Emoji → users who reacted with it. An emoji with no reactors is absent.
pub type ReactionMap = BTreeMap<String, BTreeSet<UserId>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: ReactionMap,
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,
    /// Correlation id chosen by the sending client and echoed by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
    #[serde(skip)]
    pub delivery: DeliveryState,
}

impl Message {
    /// Build the provisional copy of a message the local user is sending.
    pub fn provisional(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        kind: MessageKind,
        attachments: Vec<Attachment>,
        client_message_id: String,
    ) -> Self {
        Self {
            id: MessageId::provisional(),
            conversation_id,
            sender_id,
            content,
            kind,
            attachments,
            created_at: Utc::now(),
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            reactions: ReactionMap::new(),
            read_by: BTreeSet::new(),
            client_message_id: Some(client_message_id),
            delivery: DeliveryState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Pending
    }

    /// Replace the content and flag the message as edited.
    pub fn apply_edit(&mut self, content: &str, edited_at: DateTime<Utc>) {
        self.content = content.to_string();
        self.is_edited = true;
        self.edited_at = Some(edited_at);
    }

    /// Flag the message as deleted. The entry keeps its position and id.
    pub fn apply_delete(&mut self, deleted_at: DateTime<Utc>) {
        if !self.is_deleted {
            self.is_deleted = true;
            self.deleted_at = Some(deleted_at);
        }
    }

    /// Set-union of `user` into the reactors of `emoji`. Returns whether
    /// anything changed.
    pub fn add_reaction(&mut self, emoji: &str, user: &UserId) -> bool {
        self.reactions
            .entry(emoji.to_string())
            .or_default()
            .insert(user.clone())
    }

    /// Set-difference of `user` from the reactors of `emoji`; the emoji key
    /// disappears once nobody reacts with it.
    pub fn remove_reaction(&mut self, emoji: &str, user: &UserId) -> bool {
        let Some(users) = self.reactions.get_mut(emoji) else {
            return false;
        };
        let removed = users.remove(user);
        if users.is_empty() {
            self.reactions.remove(emoji);
        }
        removed
    }

    pub fn mark_read_by(&mut self, user: &UserId) -> bool {
        self.read_by.insert(user.clone())
    }

    /// Text used as the conversation-list preview for this message.
    pub fn preview(&self) -> String {
        if !self.content.is_empty() {
            return self.content.clone();
        }
        match self.kind {
            MessageKind::Image => "[image]".to_string(),
            MessageKind::File => "[file]".to_string(),
            _ => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Pagination metadata as reported by the messages endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub pages: Option<u32>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

impl Pagination {
    /// Whether older pages exist after `page`, if the metadata says so.
    pub fn has_more_after(&self, page: u32) -> Option<bool> {
        if let Some(has_more) = self.has_more {
            return Some(has_more);
        }
        self.pages.map(|pages| page < pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        serde_json::from_value(serde_json::json!({
            "id": "m1",
            "conversationId": "c1",
            "senderId": "u1",
            "content": "hello",
            "type": "text",
            "createdAt": "2026-01-02T03:04:05Z"
        }))
        .unwrap()
    }

    #[test]
    fn decodes_minimal_server_message() {
        let msg = message();
        assert_eq!(msg.id, MessageId::from("m1"));
        assert!(msg.reactions.is_empty());
        assert!(!msg.is_deleted);
        assert_eq!(msg.delivery, DeliveryState::Sent);
    }

    #[test]
    fn reaction_add_then_remove_restores_map() {
        let mut msg = message();
        msg.add_reaction("👍", &UserId::from("u2"));
        let before = msg.reactions.clone();

        assert!(msg.add_reaction("🔥", &UserId::from("u3")));
        assert!(msg.remove_reaction("🔥", &UserId::from("u3")));
        assert_eq!(msg.reactions, before);
    }

    #[test]
    fn reactions_are_idempotent() {
        let mut msg = message();
        let user = UserId::from("u2");
        assert!(msg.add_reaction("👍", &user));
        assert!(!msg.add_reaction("👍", &user));
        assert_eq!(msg.reactions["👍"].len(), 1);

        assert!(msg.remove_reaction("👍", &user));
        assert!(!msg.remove_reaction("👍", &user));
        assert!(!msg.reactions.contains_key("👍"));
    }

    #[test]
    fn delete_keeps_first_timestamp() {
        let mut msg = message();
        let first = Utc::now();
        msg.apply_delete(first);
        msg.apply_delete(first + chrono::Duration::seconds(5));
        assert!(msg.is_deleted);
        assert_eq!(msg.deleted_at, Some(first));
    }

    #[test]
    fn pagination_prefers_explicit_flag() {
        let meta = Pagination {
            has_more: Some(false),
            pages: Some(9),
            ..Default::default()
        };
        assert_eq!(meta.has_more_after(1), Some(false));

        let meta = Pagination {
            pages: Some(3),
            ..Default::default()
        };
        assert_eq!(meta.has_more_after(2), Some(true));
        assert_eq!(meta.has_more_after(3), Some(false));
        assert_eq!(Pagination::default().has_more_after(1), None);
    }
}
