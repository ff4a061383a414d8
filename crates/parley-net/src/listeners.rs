//! Listener registry keyed by [`EventKind`].
//!
//! Callbacks are identified by their `Arc` allocation, so registering the
//! same callback twice is a no-op and removal needs the same `Arc` back.
//! Dispatch iterates a snapshot: a listener added while an event is being
//! delivered does not see that event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use parley_shared::{EventKind, ServerEvent};

/// Callback invoked for every event of the kind it was registered for.
pub type Listener = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

type Table = HashMap<EventKind, Vec<Listener>>;

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn lock(table: &Mutex<Table>) -> std::sync::MutexGuard<'_, Table> {
    // A panicking listener never runs under this lock, so the table itself
    // cannot be left half-updated.
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
pub struct ListenerRegistry {
    table: Arc<Mutex<Table>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `kind`. Returns `false` if it was already there.
    pub fn add(&self, kind: EventKind, listener: Listener) -> bool {
        let mut table = lock(&self.table);
        let list = table.entry(kind).or_default();
        if list.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        list.push(listener);
        true
    }

    /// Remove `listener` from `kind`. Returns `false` if it was not registered.
    pub fn remove(&self, kind: EventKind, listener: &Listener) -> bool {
        let mut table = lock(&self.table);
        let Some(list) = table.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| !same_listener(l, listener));
        let removed = list.len() != before;
        if list.is_empty() {
            table.remove(&kind);
        }
        removed
    }

    /// Listeners for `kind`, in registration order.
    pub fn snapshot(&self, kind: EventKind) -> Vec<Listener> {
        lock(&self.table).get(&kind).cloned().unwrap_or_default()
    }

    pub fn len(&self, kind: EventKind) -> usize {
        lock(&self.table).get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.table).is_empty()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        lock(&self.table).clear();
    }

    /// Deliver `event` to a snapshot of its listeners.
    pub fn dispatch(&self, event: &ServerEvent) {
        for listener in self.snapshot(event.kind()) {
            listener(event);
        }
    }

    /// Start a group of registrations that are removed together.
    pub fn subscriptions(&self) -> Subscriptions {
        Subscriptions {
            table: Arc::downgrade(&self.table),
            entries: Vec::new(),
        }
    }
}

/// A group of registrations removed atomically by [`Subscriptions::cancel`]
/// or on drop.
pub struct Subscriptions {
    table: Weak<Mutex<Table>>,
    entries: Vec<(EventKind, Listener)>,
}

impl Subscriptions {
    /// Register `listener` for `kind` as part of this group.
    pub fn on(&mut self, kind: EventKind, listener: Listener) -> &mut Self {
        let Some(table) = self.table.upgrade() else {
            return self;
        };
        let mut table = lock(&table);
        let list = table.entry(kind).or_default();
        if !list.iter().any(|l| same_listener(l, &listener)) {
            list.push(listener.clone());
            self.entries.push((kind, listener));
        }
        self
    }

    /// Convenience for closures.
    pub fn on_fn<F>(&mut self, kind: EventKind, f: F) -> &mut Self
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.on(kind, Arc::new(f))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every registration of the group under a single lock.
    /// Idempotent.
    pub fn cancel(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.entries);
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = lock(&table);
        for (kind, listener) in entries {
            if let Some(list) = table.get_mut(&kind) {
                list.retain(|l| !same_listener(l, &listener));
                if list.is_empty() {
                    table.remove(&kind);
                }
            }
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let listener: Listener = Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let registry = ListenerRegistry::new();
        let (count, listener) = counter();

        assert!(registry.add(EventKind::Connect, listener.clone()));
        assert!(!registry.add(EventKind::Connect, listener.clone()));
        registry.dispatch(&ServerEvent::Connect);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(registry.remove(EventKind::Connect, &listener));
        assert!(!registry.remove(EventKind::Connect, &listener));
        registry.dispatch(&ServerEvent::Connect);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn delivers_in_registration_order() {
        let registry = ListenerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            registry.add(
                EventKind::Connect,
                Arc::new(move |_| order.lock().unwrap().push(i)),
            );
        }
        registry.dispatch(&ServerEvent::Connect);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn listener_added_during_dispatch_misses_that_event() {
        let registry = ListenerRegistry::new();
        let (late_count, late) = counter();
        let r = registry.clone();
        registry.add(
            EventKind::Connect,
            Arc::new(move |_| {
                r.add(EventKind::Connect, late.clone());
            }),
        );

        registry.dispatch(&ServerEvent::Connect);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);
        registry.dispatch(&ServerEvent::Connect);
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriptions_are_removed_together() {
        let registry = ListenerRegistry::new();
        let (count, _) = counter();
        {
            let mut subs = registry.subscriptions();
            for kind in EventKind::CONVERSATION_SCOPED {
                let c = count.clone();
                subs.on_fn(kind, move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                });
            }
            assert_eq!(subs.len(), 9);
            assert_eq!(registry.len(EventKind::NewMessage), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_is_idempotent_and_survives_clear() {
        let registry = ListenerRegistry::new();
        let (_, listener) = counter();
        let mut subs = registry.subscriptions();
        subs.on(EventKind::Disconnect, listener.clone());
        registry.clear();
        subs.cancel();
        subs.cancel();
        assert!(subs.is_empty());
        assert_eq!(registry.len(EventKind::Disconnect), 0);
    }
}
