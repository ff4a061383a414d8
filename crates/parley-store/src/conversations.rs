//! Conversation list with its summary fields (preview, timestamp, unread).

use chrono::{DateTime, Utc};

use parley_shared::{Conversation, ConversationId};

/// Preview fields captured before an optimistic update, so they can be put
/// back if the send fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSnapshot {
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Conversations ordered most-recently-active first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationList {
    items: Vec<Conversation>,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<Conversation> {
        self.items.clone()
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|c| &c.id == id)
    }

    fn get_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.items.iter_mut().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.get(id).is_some()
    }

    /// Replace the whole list with an authoritative snapshot.
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.items = conversations;
    }

    /// Insert or overwrite a single conversation, keeping its position.
    pub fn upsert(&mut self, conversation: Conversation) {
        match self.get_mut(&conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.items.push(conversation),
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn move_to_front(&mut self, id: &ConversationId) {
        if let Some(idx) = self.items.iter().position(|c| &c.id == id) {
            if idx > 0 {
                let conversation = self.items.remove(idx);
                self.items.insert(0, conversation);
            }
        }
    }

    /// Apply an incoming message to the summary. Returns `false` when the
    /// conversation is not in the list.
    pub fn apply_incoming(
        &mut self,
        id: &ConversationId,
        preview: String,
        at: DateTime<Utc>,
        count_unread: bool,
    ) -> bool {
        let Some(conversation) = self.get_mut(id) else {
            return false;
        };
        conversation.last_message = Some(preview);
        conversation.last_message_at = Some(at);
        if count_unread {
            conversation.unread_count += 1;
        }
        self.move_to_front(id);
        true
    }

    /// Update the preview for a message the local user sent. Applying the
    /// same values twice is harmless. Returns the previous preview.
    pub fn record_outgoing(
        &mut self,
        id: &ConversationId,
        preview: String,
        at: DateTime<Utc>,
    ) -> Option<PreviewSnapshot> {
        let conversation = self.get_mut(id)?;
        let previous = PreviewSnapshot {
            last_message: conversation.last_message.replace(preview),
            last_message_at: conversation.last_message_at.replace(at),
        };
        self.move_to_front(id);
        Some(previous)
    }

    /// Put back `previous` if the preview still shows the entry stamped
    /// `expected_at`.
    pub fn restore_preview(
        &mut self,
        id: &ConversationId,
        expected_at: DateTime<Utc>,
        previous: PreviewSnapshot,
    ) -> bool {
        match self.get_mut(id) {
            Some(conversation) if conversation.last_message_at == Some(expected_at) => {
                conversation.last_message = previous.last_message;
                conversation.last_message_at = previous.last_message_at;
                true
            }
            _ => false,
        }
    }

    pub fn reset_unread(&mut self, id: &ConversationId) -> bool {
        match self.get_mut(id) {
            Some(conversation) if conversation.unread_count > 0 => {
                conversation.unread_count = 0;
                true
            }
            _ => false,
        }
    }

    pub fn total_unread(&self) -> u32 {
        self.items.iter().map(|c| c.unread_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{Participant, UserId};

    fn conversation(id: &str, unread: u32) -> Conversation {
        Conversation {
            id: ConversationId::from(id),
            participant: Participant {
                id: UserId::from(format!("peer-{id}")),
                name: format!("Peer {id}"),
                avatar: None,
            },
            last_message: Some("old".into()),
            last_message_at: None,
            unread_count: unread,
        }
    }

    fn list() -> ConversationList {
        let mut list = ConversationList::new();
        list.replace_all(vec![conversation("a", 0), conversation("b", 2)]);
        list
    }

    #[test]
    fn incoming_updates_summary_and_moves_to_front() {
        let mut list = list();
        let at = Utc::now();
        assert!(list.apply_incoming(&ConversationId::from("b"), "new".into(), at, true));

        let b = list.get(&ConversationId::from("b")).unwrap();
        assert_eq!(b.unread_count, 3);
        assert_eq!(b.last_message.as_deref(), Some("new"));
        assert_eq!(b.last_message_at, Some(at));
        assert_eq!(list.iter().next().unwrap().id.as_str(), "b");
    }

    #[test]
    fn incoming_for_unknown_conversation_is_reported() {
        let mut list = list();
        assert!(!list.apply_incoming(&ConversationId::from("zzz"), "x".into(), Utc::now(), true));
        assert_eq!(list.total_unread(), 2);
    }

    #[test]
    fn failed_send_restores_preview() {
        let mut list = list();
        let id = ConversationId::from("a");
        let at = Utc::now();
        let previous = list.record_outgoing(&id, "draft".into(), at).unwrap();
        assert_eq!(list.get(&id).unwrap().last_message.as_deref(), Some("draft"));

        assert!(list.restore_preview(&id, at, previous));
        assert_eq!(list.get(&id).unwrap().last_message.as_deref(), Some("old"));
    }

    #[test]
    fn restore_skips_when_newer_message_arrived() {
        let mut list = list();
        let id = ConversationId::from("a");
        let at = Utc::now();
        let previous = list.record_outgoing(&id, "draft".into(), at).unwrap();
        let later = at + chrono::Duration::seconds(1);
        list.apply_incoming(&id, "reply".into(), later, false);

        assert!(!list.restore_preview(&id, at, previous));
        assert_eq!(list.get(&id).unwrap().last_message.as_deref(), Some("reply"));
    }

    #[test]
    fn reset_unread() {
        let mut list = list();
        assert!(list.reset_unread(&ConversationId::from("b")));
        assert!(!list.reset_unread(&ConversationId::from("b")));
        assert_eq!(list.total_unread(), 0);
    }
}
