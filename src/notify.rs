//! Change notifications
//!
//! Each entity has one [`Notifier`]. Events are delivered after the
//! transaction that produced them commits, or right after the operation when
//! the caller supplied the transaction.

use crate::storage::Key;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Create, EventKind::Update, EventKind::Delete];
}

/// One record changed
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub entity: String,
    pub kind: EventKind,
    pub key: Key,
}

pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Handle returned by [`Notifier::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kinds: Vec<EventKind>,
    listener: Listener,
}

/// Subscribers of one entity
pub struct Notifier {
    entity: String,
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl Notifier {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            next_id: AtomicU64::new(1),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Call `listener` for every event of the given kinds
    pub fn subscribe(&self, kinds: &[EventKind], listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                kinds: kinds.to_vec(),
                listener,
            });
        id
    }

    /// Remove a subscription; returns false if it was not registered here
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write().unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn emit(&self, event: &ChangeEvent) {
        // Listeners run without the lock held so they may (un)subscribe.
        let listeners: Vec<Listener> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.kinds.contains(&event.kind))
            .map(|s| Arc::clone(&s.listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_subscribe_filters_kinds() {
        let notifier = Notifier::new("User");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = notifier.subscribe(
            &[EventKind::Create, EventKind::Delete],
            Arc::new(move |e: &ChangeEvent| sink.lock().unwrap().push(e.kind)),
        );

        for kind in EventKind::ALL {
            notifier.emit(&ChangeEvent {
                entity: "User".into(),
                kind,
                key: Key::single(1),
            });
        }
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::Create, EventKind::Delete]);

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
