//! Live-connection wire protocol.
//!
//! Event names are the contract with the server and must not change. Frames
//! travel as JSON `{"event": <name>, "data": <payload>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::Message;
use crate::types::{ConversationId, MessageId, PresenceStatus, UserId};

/// One named event with its JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::MalformedFrame)
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Closed set of inbound event kinds. Listeners register against these
/// instead of free-form strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connect,
    Disconnect,
    ConnectError,
    UserOnline,
    UserOffline,
    NewMessage,
    UserTyping,
    UserStoppedTyping,
    ReactionAdded,
    ReactionRemoved,
    MessageEdited,
    MessageDeleted,
    MessagesRead,
    PresenceChange,
    Notification,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::ConnectError,
        EventKind::UserOnline,
        EventKind::UserOffline,
        EventKind::NewMessage,
        EventKind::UserTyping,
        EventKind::UserStoppedTyping,
        EventKind::ReactionAdded,
        EventKind::ReactionRemoved,
        EventKind::MessageEdited,
        EventKind::MessageDeleted,
        EventKind::MessagesRead,
        EventKind::PresenceChange,
        EventKind::Notification,
    ];

    /// The nine kinds bound to the lifetime of the open conversation.
    pub const CONVERSATION_SCOPED: [EventKind; 9] = [
        EventKind::NewMessage,
        EventKind::UserTyping,
        EventKind::UserStoppedTyping,
        EventKind::ReactionAdded,
        EventKind::ReactionRemoved,
        EventKind::MessageEdited,
        EventKind::MessageDeleted,
        EventKind::MessagesRead,
        EventKind::PresenceChange,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::ConnectError => "connect_error",
            EventKind::UserOnline => "user_online",
            EventKind::UserOffline => "user_offline",
            EventKind::NewMessage => "new_message",
            EventKind::UserTyping => "user_typing",
            EventKind::UserStoppedTyping => "user_stopped_typing",
            EventKind::ReactionAdded => "reaction_added",
            EventKind::ReactionRemoved => "reaction_removed",
            EventKind::MessageEdited => "message_edited",
            EventKind::MessageDeleted => "message_deleted",
            EventKind::MessagesRead => "messages_read",
            EventKind::PresenceChange => "presence_change",
            EventKind::Notification => "notification",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageEvent {
    pub conversation_id: ConversationId,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEvent {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEditedEvent {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub content: String,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedEvent {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadEvent {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresenceEvent {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChangeEvent {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connect,
    Disconnect { reason: String },
    /// The handshake failed. `auth_rejected` is set when the server refused
    /// the credential, which is never retried.
    ConnectError { message: String, auth_rejected: bool },
    UserOnline(UserPresenceEvent),
    UserOffline(UserPresenceEvent),
    NewMessage(NewMessageEvent),
    UserTyping(TypingEvent),
    UserStoppedTyping(TypingEvent),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    MessageEdited(MessageEditedEvent),
    MessageDeleted(MessageDeletedEvent),
    MessagesRead(MessagesReadEvent),
    PresenceChange(PresenceChangeEvent),
    Notification(serde_json::Value),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Connect => EventKind::Connect,
            ServerEvent::Disconnect { .. } => EventKind::Disconnect,
            ServerEvent::ConnectError { .. } => EventKind::ConnectError,
            ServerEvent::UserOnline(_) => EventKind::UserOnline,
            ServerEvent::UserOffline(_) => EventKind::UserOffline,
            ServerEvent::NewMessage(_) => EventKind::NewMessage,
            ServerEvent::UserTyping(_) => EventKind::UserTyping,
            ServerEvent::UserStoppedTyping(_) => EventKind::UserStoppedTyping,
            ServerEvent::ReactionAdded(_) => EventKind::ReactionAdded,
            ServerEvent::ReactionRemoved(_) => EventKind::ReactionRemoved,
            ServerEvent::MessageEdited(_) => EventKind::MessageEdited,
            ServerEvent::MessageDeleted(_) => EventKind::MessageDeleted,
            ServerEvent::MessagesRead(_) => EventKind::MessagesRead,
            ServerEvent::PresenceChange(_) => EventKind::PresenceChange,
            ServerEvent::Notification(_) => EventKind::Notification,
        }
    }

    /// Conversation the event is scoped to, if any.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            ServerEvent::NewMessage(e) => Some(&e.conversation_id),
            ServerEvent::UserTyping(e) | ServerEvent::UserStoppedTyping(e) => {
                Some(&e.conversation_id)
            }
            ServerEvent::ReactionAdded(e) | ServerEvent::ReactionRemoved(e) => {
                Some(&e.conversation_id)
            }
            ServerEvent::MessageEdited(e) => Some(&e.conversation_id),
            ServerEvent::MessageDeleted(e) => Some(&e.conversation_id),
            ServerEvent::MessagesRead(e) => Some(&e.conversation_id),
            _ => None,
        }
    }

    /// Decode a frame received from the server.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let kind = EventKind::from_name(&frame.event)
            .ok_or_else(|| ProtocolError::UnknownEvent(frame.event.clone()))?;
        let data = frame.data.clone();

        let event = match kind {
            EventKind::Connect => ServerEvent::Connect,
            EventKind::Disconnect => ServerEvent::Disconnect {
                reason: data.as_str().unwrap_or_default().to_string(),
            },
            EventKind::ConnectError => ServerEvent::ConnectError {
                message: data
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string(),
                auth_rejected: false,
            },
            EventKind::UserOnline => ServerEvent::UserOnline(payload(kind, data)?),
            EventKind::UserOffline => ServerEvent::UserOffline(payload(kind, data)?),
            EventKind::NewMessage => ServerEvent::NewMessage(payload(kind, data)?),
            EventKind::UserTyping => ServerEvent::UserTyping(payload(kind, data)?),
            EventKind::UserStoppedTyping => ServerEvent::UserStoppedTyping(payload(kind, data)?),
            EventKind::ReactionAdded => ServerEvent::ReactionAdded(payload(kind, data)?),
            EventKind::ReactionRemoved => ServerEvent::ReactionRemoved(payload(kind, data)?),
            EventKind::MessageEdited => ServerEvent::MessageEdited(payload(kind, data)?),
            EventKind::MessageDeleted => ServerEvent::MessageDeleted(payload(kind, data)?),
            EventKind::MessagesRead => ServerEvent::MessagesRead(payload(kind, data)?),
            EventKind::PresenceChange => ServerEvent::PresenceChange(payload(kind, data)?),
            EventKind::Notification => ServerEvent::Notification(data),
        };
        Ok(event)
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: EventKind,
    data: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::MalformedPayload {
        event: kind.name(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Events the client emits over the live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEmit {
    JoinConversation(ConversationId),
    LeaveConversation(ConversationId),
    TypingStart(ConversationId),
    TypingStop(ConversationId),
    MarkRead(ConversationId),
}

impl ClientEmit {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEmit::JoinConversation(_) => "join_conversation",
            ClientEmit::LeaveConversation(_) => "leave_conversation",
            ClientEmit::TypingStart(_) => "typing_start",
            ClientEmit::TypingStop(_) => "typing_stop",
            ClientEmit::MarkRead(_) => "mark_read",
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            ClientEmit::JoinConversation(id)
            | ClientEmit::LeaveConversation(id)
            | ClientEmit::TypingStart(id)
            | ClientEmit::TypingStop(id)
            | ClientEmit::MarkRead(id) => id,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let data = match self {
            // Room membership takes the bare id.
            ClientEmit::JoinConversation(id) | ClientEmit::LeaveConversation(id) => {
                serde_json::Value::String(id.to_string())
            }
            ClientEmit::TypingStart(id) | ClientEmit::TypingStop(id) | ClientEmit::MarkRead(id) => {
                serde_json::json!({ "conversationId": id })
            }
        };
        Frame::new(self.name(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_round_trips_through_its_name() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_name("user_joined"), None);
    }

    #[test]
    fn decodes_reaction_frame() {
        let frame = Frame::from_json(
            r#"{"event":"reaction_added","data":{"conversationId":"c1","messageId":"m1","userId":"u2","emoji":"🎉"}}"#,
        )
        .unwrap();
        let event = ServerEvent::decode(&frame).unwrap();
        assert_eq!(event.kind(), EventKind::ReactionAdded);
        assert_eq!(event.conversation_id(), Some(&ConversationId::from("c1")));
    }

    #[test]
    fn presence_events_are_not_conversation_scoped() {
        let frame = Frame::new(
            "presence_change",
            serde_json::json!({ "userId": "u9", "status": "offline" }),
        );
        let event = ServerEvent::decode(&frame).unwrap();
        assert_eq!(event.conversation_id(), None);
    }

    #[test]
    fn rejects_unknown_and_malformed_frames() {
        let unknown = Frame::new("user_joined", serde_json::Value::Null);
        assert!(matches!(
            ServerEvent::decode(&unknown),
            Err(ProtocolError::UnknownEvent(_))
        ));

        let malformed = Frame::new("message_deleted", serde_json::json!({ "messageId": 4 }));
        assert!(matches!(
            ServerEvent::decode(&malformed),
            Err(ProtocolError::MalformedPayload { event: "message_deleted", .. })
        ));
    }

    #[test]
    fn outbound_frames_use_wire_names() {
        let id = ConversationId::from("c1");
        let join = ClientEmit::JoinConversation(id.clone()).to_frame();
        assert_eq!(join.event, "join_conversation");
        assert_eq!(join.data, serde_json::json!("c1"));

        let typing = ClientEmit::TypingStart(id).to_frame();
        assert_eq!(typing.event, "typing_start");
        assert_eq!(typing.data, serde_json::json!({ "conversationId": "c1" }));
    }
}
