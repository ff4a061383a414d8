//! Merge rules applying live events onto the store state.
//!
//! Everything here is synchronous and side-effect free apart from the
//! `&mut StoreState` it is handed, so the rules can be applied under the
//! store lock and tested without a connection.
//!
//! Scoping: conversation events are ignored unless they target the active
//! conversation. New messages additionally update the list summary of any
//! conversation; presence is global and handled by
//! [`crate::presence::PresenceTracker`].

use chrono::Utc;

use parley_shared::protocol::NewMessageEvent;
use parley_shared::ServerEvent;
use parley_store::StoreState;

/// Outcome of applying a new message to the conversation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListUpdate {
    Updated,
    /// The conversation is not in the list; it should be refetched.
    UnknownConversation,
}

/// List-level effect of a new message: preview, timestamp, position and
/// unread count. Messages from the local user and messages for the open
/// conversation never count as unread.
pub fn apply_to_list(state: &mut StoreState, event: &NewMessageEvent) -> ListUpdate {
    let message = &event.message;
    let own = state.local_user.as_ref() == Some(&message.sender_id);
    let count_unread = !own && !state.is_active(&event.conversation_id);
    if state.conversations.apply_incoming(
        &event.conversation_id,
        message.preview(),
        message.created_at,
        count_unread,
    ) {
        ListUpdate::Updated
    } else {
        ListUpdate::UnknownConversation
    }
}

/// Apply a conversation-scoped event to the open conversation's history.
/// Returns whether anything changed.
pub fn apply_to_active(state: &mut StoreState, event: &ServerEvent) -> bool {
    let Some(conversation) = event.conversation_id() else {
        return false;
    };
    if !state.is_active(conversation) {
        return false;
    }

    match event {
        ServerEvent::NewMessage(e) => {
            let own = state.local_user.as_ref() == Some(&e.message.sender_id);
            if own {
                // Our own echo only ever confirms a pending entry.
                state.messages.confirm_echo(&e.message)
            } else {
                state.messages.insert_head(e.message.clone())
            }
        }
        ServerEvent::ReactionAdded(e) => {
            state
                .messages
                .add_reaction(&e.message_id, &e.emoji, &e.user_id)
        }
        ServerEvent::ReactionRemoved(e) => {
            state
                .messages
                .remove_reaction(&e.message_id, &e.emoji, &e.user_id)
        }
        ServerEvent::MessageEdited(e) => state.messages.apply_edit(
            &e.message_id,
            &e.content,
            e.edited_at.unwrap_or_else(Utc::now),
        ),
        ServerEvent::MessageDeleted(e) => state
            .messages
            .apply_delete(&e.message_id, e.deleted_at.unwrap_or_else(Utc::now)),
        ServerEvent::MessagesRead(e) => state.messages.mark_all_read_by(&e.user_id) > 0,
        // Typing is owned by the typing coordinator.
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::protocol::{MessageEditedEvent, MessagesReadEvent, ReactionEvent};
    use parley_shared::{Conversation, ConversationId, Message, MessageId, MessageKind, UserId};

    fn message(id: &str, conversation: &str, sender: &str) -> Message {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "conversationId": conversation,
            "senderId": sender,
            "content": format!("text {id}"),
            "createdAt": "2026-05-01T08:00:00Z"
        }))
        .unwrap()
    }

    fn conversation(id: &str) -> Conversation {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "participant": { "id": format!("peer-{id}"), "name": id },
        }))
        .unwrap()
    }

    fn state() -> StoreState {
        let mut state = StoreState::default();
        state
            .conversations
            .replace_all(vec![conversation("a"), conversation("b")]);
        state.active = Some(ConversationId::from("a"));
        state.local_user = Some(UserId::from("me"));
        state
    }

    fn new_message(id: &str, conversation: &str, sender: &str) -> ServerEvent {
        ServerEvent::NewMessage(NewMessageEvent {
            conversation_id: ConversationId::from(conversation),
            message: message(id, conversation, sender),
        })
    }

    fn list_update(state: &mut StoreState, event: &ServerEvent) -> ListUpdate {
        match event {
            ServerEvent::NewMessage(e) => apply_to_list(state, e),
            _ => unreachable!(),
        }
    }

    #[test]
    fn unseen_ids_grow_sequence_by_one_and_repeats_do_not() {
        let mut state = state();
        for (i, id) in ["m1", "m2", "m3"].iter().enumerate() {
            assert!(apply_to_active(&mut state, &new_message(id, "a", "peer")));
            assert_eq!(state.messages.len(), i + 1);
        }
        assert!(!apply_to_active(&mut state, &new_message("m2", "a", "peer")));
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.messages.as_slice()[0].id.as_str(), "m3");
    }

    #[test]
    fn own_echo_is_never_inserted() {
        let mut state = state();
        for _ in 0..3 {
            assert!(!apply_to_active(&mut state, &new_message("m1", "a", "me")));
        }
        assert!(state.messages.is_empty());
    }

    #[test]
    fn own_echo_confirms_pending_entry() {
        let mut state = state();
        let pending = Message::provisional(
            ConversationId::from("a"),
            UserId::from("me"),
            "hi".into(),
            MessageKind::Text,
            Vec::new(),
            "k1".into(),
        );
        state.messages.insert_head(pending);

        let mut echo = message("srv-1", "a", "me");
        echo.client_message_id = Some("k1".into());
        let event = ServerEvent::NewMessage(NewMessageEvent {
            conversation_id: ConversationId::from("a"),
            message: echo,
        });
        assert!(apply_to_active(&mut state, &event));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages.as_slice()[0].id.as_str(), "srv-1");
        assert!(!state.messages.as_slice()[0].is_pending());
    }

    #[test]
    fn unread_counts_only_inactive_conversations() {
        let mut state = state();
        let a = ConversationId::from("a");
        let b = ConversationId::from("b");

        let event = new_message("m1", "b", "peer-b");
        assert_eq!(list_update(&mut state, &event), ListUpdate::Updated);
        assert!(!apply_to_active(&mut state, &event));
        assert_eq!(list_update(&mut state, &new_message("m2", "a", "peer-a")), ListUpdate::Updated);

        let b_summary = state.conversations.get(&b).unwrap();
        assert_eq!(b_summary.unread_count, 1);
        assert_eq!(b_summary.last_message.as_deref(), Some("text m1"));
        assert!(b_summary.last_message_at.is_some());
        assert_eq!(state.conversations.get(&a).unwrap().unread_count, 0);
        assert!(state.messages.is_empty());
    }

    #[test]
    fn own_message_elsewhere_updates_preview_without_unread() {
        let mut state = state();
        let b = ConversationId::from("b");
        list_update(&mut state, &new_message("m1", "b", "me"));
        list_update(&mut state, &new_message("m1", "b", "me"));
        let summary = state.conversations.get(&b).unwrap();
        assert_eq!(summary.unread_count, 0);
        assert_eq!(summary.last_message.as_deref(), Some("text m1"));
    }

    #[test]
    fn unknown_conversation_is_reported() {
        let mut state = state();
        assert_eq!(
            list_update(&mut state, &new_message("m1", "zzz", "peer")),
            ListUpdate::UnknownConversation
        );
    }

    #[test]
    fn reaction_round_trip_restores_map() {
        let mut state = state();
        apply_to_active(&mut state, &new_message("m1", "a", "peer"));
        let before = state.messages.clone();
        let reaction = ReactionEvent {
            conversation_id: ConversationId::from("a"),
            message_id: MessageId::from("m1"),
            user_id: UserId::from("u7"),
            emoji: "🎉".into(),
        };

        assert!(apply_to_active(&mut state, &ServerEvent::ReactionAdded(reaction.clone())));
        assert!(!apply_to_active(&mut state, &ServerEvent::ReactionAdded(reaction.clone())));
        assert!(apply_to_active(&mut state, &ServerEvent::ReactionRemoved(reaction)));
        assert_eq!(state.messages, before);
    }

    #[test]
    fn edit_for_absent_id_changes_nothing() {
        let mut state = state();
        apply_to_active(&mut state, &new_message("m1", "a", "peer"));
        let before = state.messages.clone();
        let edit = ServerEvent::MessageEdited(MessageEditedEvent {
            conversation_id: ConversationId::from("a"),
            message_id: MessageId::from("missing"),
            content: "x".into(),
            edited_at: None,
        });
        assert!(!apply_to_active(&mut state, &edit));
        assert_eq!(state.messages, before);
    }

    #[test]
    fn events_for_other_conversations_are_ignored() {
        let mut state = state();
        apply_to_active(&mut state, &new_message("m1", "a", "peer"));
        let read = ServerEvent::MessagesRead(MessagesReadEvent {
            conversation_id: ConversationId::from("b"),
            user_id: UserId::from("peer-b"),
            read_at: None,
        });
        assert!(!apply_to_active(&mut state, &read));
        assert!(state.messages.as_slice()[0].read_by.is_empty());
    }

    #[test]
    fn messages_read_marks_every_message() {
        let mut state = state();
        apply_to_active(&mut state, &new_message("m1", "a", "peer"));
        apply_to_active(&mut state, &new_message("m2", "a", "peer"));
        let read = ServerEvent::MessagesRead(MessagesReadEvent {
            conversation_id: ConversationId::from("a"),
            user_id: UserId::from("peer-a"),
            read_at: None,
        });
        assert!(apply_to_active(&mut state, &read));
        assert!(state
            .messages
            .iter()
            .all(|m| m.read_by.contains(&UserId::from("peer-a"))));
    }
}
