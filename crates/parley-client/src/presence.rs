//! Online-set tracking for counterpart users.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use parley_shared::{ServerEvent, UserId};

/// Tracks which users are currently connected.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    online: Arc<Mutex<BTreeSet<UserId>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<UserId>> {
        self.online.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_user_online(&self, user: &UserId) -> bool {
        self.lock().contains(user)
    }

    pub fn set_online(&self, user: &UserId) -> bool {
        let added = self.lock().insert(user.clone());
        if added {
            debug!(user = %user, "user online");
        }
        added
    }

    pub fn set_offline(&self, user: &UserId) -> bool {
        let removed = self.lock().remove(user);
        if removed {
            debug!(user = %user, "user offline");
        }
        removed
    }

    /// Apply a presence event. Returns the affected user and whether they
    /// are now online; other events are ignored.
    pub fn apply(&self, event: &ServerEvent) -> Option<(UserId, bool)> {
        let (user, online) = match event {
            ServerEvent::UserOnline(e) => (&e.user_id, true),
            ServerEvent::UserOffline(e) => (&e.user_id, false),
            ServerEvent::PresenceChange(e) => (&e.user_id, e.status.is_online()),
            _ => return None,
        };
        if online {
            self.set_online(user);
        } else {
            self.set_offline(user);
        }
        Some((user.clone(), online))
    }

    /// Snapshot of the online set.
    pub fn online_users(&self) -> Vec<UserId> {
        self.lock().iter().cloned().collect()
    }

    pub fn online_count(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
