//! Explicit change notification for entities that can report their own edits.
//!
//! An entity opts in by carrying a [`ChangeNotifier`] field marked `#[notifier]` (field name only) or
//! `#[notifier(values)]` (field name plus old and new value). `#[derive(Entity)]` then generates
//! `set_<field>` methods that assign and notify. Observers are held weakly, a dropped observer
//! is skipped and pruned on the next notification.

use crate::value::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, Weak};

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Changed(&'static str),
    ChangedWithValues { field: &'static str, old: Value, new: Value },
}

impl ChangeEvent {
    pub fn field(&self) -> &'static str {
        match self {
            ChangeEvent::Changed(field) => field,
            ChangeEvent::ChangedWithValues { field, .. } => field,
        }
    }
}

pub trait ChangeObserver: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

#[derive(Default)]
pub struct ChangeNotifier {
    observers: Vec<Weak<dyn ChangeObserver>>,
}

impl ChangeNotifier {
    pub fn register(&mut self, observer: Weak<dyn ChangeObserver>) {
        if !self.observers.iter().any(|o| o.ptr_eq(&observer)) {
            self.observers.push(observer);
        }
    }

    pub fn deregister(&mut self, observer: &Weak<dyn ChangeObserver>) {
        self.observers.retain(|o| !o.ptr_eq(observer));
    }

    pub fn observer_count(&self) -> usize {
        self.observers.iter().filter(|o| o.strong_count() > 0).count()
    }

    pub fn changed(&mut self, field: &'static str) {
        self.publish(ChangeEvent::Changed(field));
    }

    pub fn changed_values(&mut self, field: &'static str, old: Value, new: Value) {
        self.publish(ChangeEvent::ChangedWithValues { field, old, new });
    }

    fn publish(&mut self, event: ChangeEvent) {
        self.observers.retain(|observer| match observer.upgrade() {
            Some(observer) => {
                observer.on_change(&event);
                true
            }
            None => false,
        });
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier").field("observers", &self.observer_count()).finish()
    }
}

/// Queue of events a tracked handle has not folded into its dirty set yet.
#[derive(Default)]
pub(crate) struct ChangeLog {
    events: Mutex<Vec<ChangeEvent>>,
    detached: AtomicBool,
}

impl ChangeLog {
    pub(crate) fn drain(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
        self.clear();
    }
}

impl ChangeObserver for ChangeLog {
    fn on_change(&self, event: &ChangeEvent) {
        if !self.detached.load(Ordering::Acquire) {
            self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
        }
    }
}

#[cfg(test)]
mod notify_tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn events_reach_live_observers_only() {
        let log = Arc::new(ChangeLog::default());
        let mut notifier = ChangeNotifier::default();
        let weak: Weak<dyn ChangeObserver> = Arc::downgrade(&(log.clone() as Arc<dyn ChangeObserver>));
        notifier.register(weak.clone());
        notifier.register(weak);
        assert_eq!(notifier.observer_count(), 1);

        notifier.changed("customer");
        notifier.changed_values("amount", Value::F64(1.0), Value::F64(2.0));
        let events = log.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ChangeEvent::Changed("customer"));
        assert_eq!(events[1].field(), "amount");

        drop(log);
        notifier.changed("customer");
        assert_eq!(notifier.observer_count(), 0);
    }

    #[test]
    fn detached_log_ignores_events() {
        let log = Arc::new(ChangeLog::default());
        let mut notifier = ChangeNotifier::default();
        let observer: Arc<dyn ChangeObserver> = log.clone();
        notifier.register(Arc::downgrade(&observer));
        log.detach();
        notifier.changed("customer");
        assert!(log.drain().is_empty());

        notifier.deregister(&Arc::downgrade(&observer));
        assert_eq!(notifier.observer_count(), 0);
    }
}
