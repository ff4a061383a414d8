//! In-memory message sequence of the open conversation.
//!
//! Canonical order is most-recent-first: live messages go to the head,
//! older pages are appended to the tail. The message id is the only
//! deduplication key. Every merge returns whether it changed anything so
//! replays of the same event are observable no-ops.

use chrono::{DateTime, Utc};

use parley_shared::{DeliveryState, Message, MessageId, UserId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSequence {
    items: Vec<Message>,
}

impl MessageSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.items.clone()
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.items.iter().position(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.items.iter().find(|m| &m.id == id)
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.items.iter_mut().find(|m| &m.id == id)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Insert at the head unless a message with the same id is present.
    pub fn insert_head(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.items.insert(0, message);
        true
    }

    /// Append an older page at the tail, skipping ids already present.
    /// Returns how many messages were added.
    pub fn append_page(&mut self, page: Vec<Message>) -> usize {
        let mut added = 0;
        for message in page {
            if !self.contains(&message.id) {
                self.items.push(message);
                added += 1;
            }
        }
        added
    }

    /// Merge a freshly fetched first page. Entries already present stay,
    /// since live events may be newer than the snapshot; page entries are
    /// added unless their id is known. Pending entries stay at the head and
    /// the rest is reordered newest-first. Returns how many were added.
    pub fn merge_first_page(&mut self, page: Vec<Message>) -> usize {
        let added = self.append_page(page);
        self.items.sort_by(|a, b| {
            b.is_pending()
                .cmp(&a.is_pending())
                .then(b.created_at.cmp(&a.created_at))
        });
        added
    }

    /// Swap the provisional entry for the server-confirmed message.
    ///
    /// If the confirmed id is already present (the live echo got there
    /// first) the provisional copy is simply dropped.
    pub fn confirm(&mut self, provisional: &MessageId, mut confirmed: Message) -> bool {
        confirmed.delivery = DeliveryState::Sent;
        let confirmed_present = self.contains(&confirmed.id);
        match self.position(provisional) {
            Some(idx) if confirmed_present => {
                self.items.remove(idx);
                true
            }
            Some(idx) => {
                self.items[idx] = confirmed;
                true
            }
            None if !confirmed_present => {
                self.items.insert(0, confirmed);
                true
            }
            None => false,
        }
    }

    /// Treat a live echo of our own message as confirmation of the pending
    /// entry with the same client correlation id. Never inserts.
    pub fn confirm_echo(&mut self, echo: &Message) -> bool {
        let Some(client_id) = echo.client_message_id.as_deref() else {
            return false;
        };
        if self.contains(&echo.id) {
            return false;
        }
        let Some(pending) = self
            .items
            .iter_mut()
            .find(|m| m.is_pending() && m.client_message_id.as_deref() == Some(client_id))
        else {
            return false;
        };
        let mut confirmed = echo.clone();
        confirmed.delivery = DeliveryState::Sent;
        *pending = confirmed;
        true
    }

    /// Drop an optimistic entry whose send failed. Server messages are
    /// never removed.
    pub fn remove_provisional(&mut self, id: &MessageId) -> bool {
        if !id.is_provisional() {
            return false;
        }
        let before = self.items.len();
        self.items.retain(|m| &m.id != id);
        self.items.len() != before
    }

    pub fn apply_edit(&mut self, id: &MessageId, content: &str, edited_at: DateTime<Utc>) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                message.apply_edit(content, edited_at);
                true
            }
            None => false,
        }
    }

    pub fn apply_delete(&mut self, id: &MessageId, deleted_at: DateTime<Utc>) -> bool {
        match self.get_mut(id) {
            Some(message) if !message.is_deleted => {
                message.apply_delete(deleted_at);
                true
            }
            _ => false,
        }
    }

    pub fn add_reaction(&mut self, id: &MessageId, emoji: &str, user: &UserId) -> bool {
        self.get_mut(id)
            .map_or(false, |message| message.add_reaction(emoji, user))
    }

    pub fn remove_reaction(&mut self, id: &MessageId, emoji: &str, user: &UserId) -> bool {
        self.get_mut(id)
            .map_or(false, |message| message.remove_reaction(emoji, user))
    }

    /// Record `user` as having read every message. Returns how many
    /// messages changed.
    pub fn mark_all_read_by(&mut self, user: &UserId) -> usize {
        self.items
            .iter_mut()
            .map(|m| m.mark_read_by(user))
            .filter(|changed| *changed)
            .count()
    }
}
