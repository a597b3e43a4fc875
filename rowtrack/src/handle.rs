//! One tracked entity instance: its key, last authoritative token, original values and dirty fields.
//!
//! Locking: a handle never blocks on the entity lock while holding its own mutex. State queries try the
//! entity read lock and, if a writer holds it, release the handle and wait for the writer before retrying.
//! Operations that write the entity (merge, accept_changes) take the entity lock first and the handle second.
//! Holding an entity write guard while querying or loading that same entity deadlocks the calling thread, and so
//! does loading a key while the same thread still holds an unfinished lease on it.

use crate::descriptor::{DirtyCheckMode, Entity, EntityDescriptor, Shared};
use crate::error::{ConfigError, HydrationError, TrackError};
use crate::merge::{self, ConcurrencyConflict};
use crate::notify::{ChangeEvent, ChangeLog, ChangeObserver};
use crate::tracker::LeaseKind;
use crate::value::{KeyValue, Value};
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, TryLockError, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Initializing,
    Unchanged,
    Modified,
    Invalid,
}

pub(crate) struct HandleInner<T> {
    token: Option<Value>,
    token_current: bool,
    entity: Weak<RwLock<T>>,
    original: HashMap<&'static str, Value>,
    dirty: BTreeSet<&'static str>,
    state: HandleState,
    /// A lease is outstanding, other loaders wait on `idle`.
    busy: bool,
}

pub(crate) enum Decision<T> {
    Wait,
    Contended(Shared<T>),
    Replace,
    Existing(Shared<T>),
    Reload(Shared<T>),
    Merge(Shared<T>),
}

enum Refresh<T> {
    Done,
    Blocked(Shared<T>),
}

pub struct TrackedHandle<T: Entity> {
    key: KeyValue,
    descriptor: Arc<EntityDescriptor<T>>,
    changes: Arc<ChangeLog>,
    inner: Mutex<HandleInner<T>>,
    idle: Condvar,
}

impl<T: Entity> TrackedHandle<T> {
    /// Allocates a fresh instance with its key set and a handle leased to the caller in Initializing state.
    pub(crate) fn create(
        descriptor: Arc<EntityDescriptor<T>>,
        key: KeyValue,
        token: Option<Value>,
    ) -> Result<(Arc<Self>, Shared<T>), HydrationError> {
        let mut entity = descriptor.instantiate(&key)?;
        let changes = Arc::new(ChangeLog::default());
        let observer: Arc<dyn ChangeObserver> = changes.clone();
        descriptor.subscribe(&mut entity, Arc::downgrade(&observer));
        let shared = Arc::new(RwLock::new(entity));
        let inner = HandleInner {
            token,
            token_current: false,
            entity: Arc::downgrade(&shared),
            original: HashMap::new(),
            dirty: BTreeSet::new(),
            state: HandleState::Initializing,
            busy: true,
        };
        let handle = Arc::new(Self { key, descriptor, changes, inner: Mutex::new(inner), idle: Condvar::new() });
        Ok((handle, shared))
    }

    fn lock(&self) -> MutexGuard<'_, HandleInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &KeyValue {
        &self.key
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor<T>> {
        &self.descriptor
    }

    pub fn mode(&self) -> DirtyCheckMode {
        self.descriptor.mode()
    }

    pub fn state(&self) -> HandleState {
        self.refreshed(|inner| inner.state)
    }

    /// Names of the required fields whose value differs from the last clean one, sorted.
    pub fn dirty_fields(&self) -> Vec<&'static str> {
        self.refreshed(|inner| inner.dirty.iter().copied().collect())
    }

    pub fn is_dirty(&self, field: &str) -> bool {
        self.refreshed(|inner| inner.dirty.contains(field))
    }

    pub fn original_value(&self, field: &str) -> Option<Value> {
        self.refreshed(|inner| inner.original.get(field).cloned())
    }

    pub fn token(&self) -> Option<Value> {
        self.lock().token.clone()
    }

    /// Whether the token held here is the one the database reported most recently.
    pub fn is_token_current(&self) -> bool {
        self.lock().token_current
    }

    pub fn entity(&self) -> Option<Shared<T>> {
        let mut inner = self.lock();
        if inner.state == HandleState::Invalid {
            return None;
        }
        let entity = inner.entity.upgrade();
        if entity.is_none() {
            self.invalidate(&mut inner);
        }
        entity
    }

    fn refreshed<R>(&self, read: impl Fn(&mut HandleInner<T>) -> R) -> R {
        loop {
            let mut inner = self.lock();
            match self.try_refresh(&mut inner) {
                Refresh::Done => return read(&mut inner),
                Refresh::Blocked(entity) => {
                    drop(inner);
                    drop(entity.read());
                }
            }
        }
    }

    fn try_refresh(&self, inner: &mut HandleInner<T>) -> Refresh<T> {
        if inner.state == HandleState::Invalid || inner.busy {
            return Refresh::Done;
        }
        let Some(entity) = inner.entity.upgrade() else {
            self.invalidate(inner);
            return Refresh::Done;
        };
        let refreshed = match entity.try_read() {
            Ok(guard) => {
                self.sync_dirty(inner, &guard);
                true
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                self.sync_dirty(inner, &poisoned.into_inner());
                true
            }
            Err(TryLockError::WouldBlock) => false,
        };
        if refreshed { Refresh::Done } else { Refresh::Blocked(entity) }
    }

    /// Folds edits made since the last look into the dirty set and re-derives the state.
    fn sync_dirty(&self, inner: &mut HandleInner<T>, entity: &T) {
        if matches!(inner.state, HandleState::Initializing | HandleState::Invalid) {
            self.changes.clear();
            return;
        }
        match self.descriptor.mode() {
            DirtyCheckMode::FullScan => {
                for field in self.descriptor.tracked_fields() {
                    let current = field.read(entity);
                    mark(inner, field.name(), &current);
                }
            }
            DirtyCheckMode::Cached => {
                for event in self.changes.drain() {
                    if let Some(field) = self.descriptor.tracked_field(event.field()) {
                        let current = field.read(entity);
                        mark(inner, field.name(), &current);
                    }
                }
            }
            DirtyCheckMode::Advanced => {
                for event in self.changes.drain() {
                    let Some(field) = self.descriptor.tracked_field(event.field()) else { continue };
                    let name = field.name();
                    match event {
                        ChangeEvent::ChangedWithValues { old, new, .. } => {
                            let reverted = *inner.original.entry(name).or_insert(old) == new;
                            if reverted {
                                inner.original.remove(name);
                                inner.dirty.remove(name);
                            } else {
                                inner.dirty.insert(name);
                            }
                        }
                        ChangeEvent::Changed(_) => {
                            let current = field.read(entity);
                            mark(inner, name, &current);
                        }
                    }
                }
            }
        }
        inner.state = if inner.dirty.is_empty() { HandleState::Unchanged } else { HandleState::Modified };
    }

    fn invalidate(&self, inner: &mut HandleInner<T>) {
        if inner.state != HandleState::Invalid {
            debug!("{} key {} invalidated", self.descriptor.type_name(), self.key);
        }
        inner.state = HandleState::Invalid;
        inner.busy = false;
        inner.dirty.clear();
        inner.original.clear();
        self.changes.detach();
        if let Some(entity) = inner.entity.upgrade() {
            if let Ok(mut guard) = entity.try_write() {
                let observer: Arc<dyn ChangeObserver> = self.changes.clone();
                self.descriptor.unsubscribe(&mut guard, &Arc::downgrade(&observer));
            }
        }
        self.idle.notify_all();
    }

    /// Cheap liveness probe for prune sweeps, never touches the entity lock.
    pub(crate) fn is_dead(&self) -> bool {
        let mut inner = self.lock();
        if inner.busy {
            return false;
        }
        if inner.state != HandleState::Invalid && inner.entity.strong_count() == 0 {
            self.invalidate(&mut inner);
        }
        inner.state == HandleState::Invalid
    }

    pub(crate) fn wait_idle(&self) {
        let mut inner = self.lock();
        while inner.busy {
            inner = self.idle.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Evaluates the reconciliation table for a fresh row carrying `token`. Leasing decisions mark the handle busy
    /// before the tracker map is released.
    pub(crate) fn decide(&self, token: Option<&Value>) -> Result<Decision<T>, TrackError> {
        let mut inner = self.lock();
        if inner.busy {
            return Ok(Decision::Wait);
        }
        if let Refresh::Blocked(entity) = self.try_refresh(&mut inner) {
            return Ok(Decision::Contended(entity));
        }
        if inner.state == HandleState::Invalid {
            return Ok(Decision::Replace);
        }
        let Some(entity) = inner.entity.upgrade() else {
            self.invalidate(&mut inner);
            return Ok(Decision::Replace);
        };
        let tokened = self.descriptor.concurrency_field().is_some();
        // a clean instance whose reload was abandoned may hold a partial row, it is reloaded whatever the token
        let stale = inner.state == HandleState::Unchanged && !inner.token_current;
        let same_token = tokened && !stale && inner.token.as_ref() == token;
        match inner.state {
            HandleState::Unchanged | HandleState::Modified if same_token => Ok(Decision::Existing(entity)),
            HandleState::Modified if !tokened => {
                inner.token_current = false;
                Err(TrackError::UnverifiableEdits { entity: self.descriptor.type_name(), key: self.key.value().clone() })
            }
            HandleState::Modified => {
                inner.busy = true;
                inner.token_current = false;
                Ok(Decision::Merge(entity))
            }
            HandleState::Unchanged | HandleState::Initializing => {
                inner.state = HandleState::Initializing;
                inner.busy = true;
                inner.token_current = false;
                Ok(Decision::Reload(entity))
            }
            HandleState::Invalid => Ok(Decision::Replace),
        }
    }

    /// Initializing → Unchanged once every field of the row has been written.
    pub(crate) fn complete(&self, entity: &Shared<T>, token: Option<Value>) -> Result<(), ConfigError> {
        let guard = entity.read().unwrap_or_else(PoisonError::into_inner);
        let mut inner = self.lock();
        if inner.state != HandleState::Initializing {
            inner.busy = false;
            self.idle.notify_all();
            return Err(ConfigError::NotInitializing {
                entity: self.descriptor.type_name(),
                key: self.key.value().clone(),
                state: inner.state,
            });
        }
        self.reset_clean(&mut inner, &guard);
        inner.token = token;
        inner.token_current = true;
        inner.busy = false;
        self.changes.clear();
        self.idle.notify_all();
        Ok(())
    }

    fn reset_clean(&self, inner: &mut HandleInner<T>, entity: &T) {
        inner.original.clear();
        inner.dirty.clear();
        if self.descriptor.mode() != DirtyCheckMode::Advanced {
            for field in self.descriptor.tracked_fields() {
                inner.original.insert(field.name(), field.read(entity));
            }
        }
        inner.state = HandleState::Unchanged;
    }

    pub(crate) fn merge(&self, entity: &Shared<T>, incoming: &[(usize, Value)], token: Option<Value>) -> Result<(), TrackError> {
        let mut guard = entity.write().unwrap_or_else(PoisonError::into_inner);
        let mut inner = self.lock();
        let outcome = self.reconcile(&mut inner, &mut guard, incoming, token);
        inner.busy = false;
        self.idle.notify_all();
        outcome
    }

    fn reconcile(
        &self,
        inner: &mut HandleInner<T>,
        entity: &mut T,
        incoming: &[(usize, Value)],
        token: Option<Value>,
    ) -> Result<(), TrackError> {
        self.sync_dirty(inner, entity);
        let mode = self.descriptor.mode();
        let conflicts =
            merge::merge_fields(&self.descriptor, entity, &mut inner.original, &mut inner.dirty, mode, incoming)?;
        self.descriptor.stamp_loaded_at(entity)?;
        inner.token = token;
        inner.token_current = true;
        inner.state = if inner.dirty.is_empty() { HandleState::Unchanged } else { HandleState::Modified };
        if conflicts.is_empty() {
            return Ok(());
        }
        let conflict = ConcurrencyConflict::new(self.descriptor.type_name(), self.key.value().clone(), conflicts);
        warn!("{conflict}");
        Err(conflict.into())
    }

    /// Gives back an unfinished lease. A created instance nobody saw is dropped from tracking. A reloaded one stays
    /// the tracked instance: whatever it holds now becomes its clean content under the old, no longer current token,
    /// so the next row reloads it in place.
    pub(crate) fn abandon(&self, entity: &Shared<T>, kind: LeaseKind) {
        match kind {
            LeaseKind::Create => {
                let mut inner = self.lock();
                self.invalidate(&mut inner);
            }
            LeaseKind::Reload => {
                let guard = entity.read().unwrap_or_else(PoisonError::into_inner);
                let mut inner = self.lock();
                if inner.state == HandleState::Initializing {
                    self.changes.clear();
                    self.reset_clean(&mut inner, &guard);
                    inner.token_current = false;
                }
                inner.busy = false;
                self.idle.notify_all();
            }
            LeaseKind::Merge => {
                let mut inner = self.lock();
                inner.busy = false;
                self.idle.notify_all();
            }
        }
    }

    /// Marks the live instance clean after the application persisted it, adopting the token the database now holds.
    pub fn accept_changes(&self, token: Option<Value>) -> Result<(), TrackError> {
        let token = self.descriptor.normalize_token(token)?;
        let detached = || TrackError::Detached { entity: self.descriptor.type_name(), key: self.key.value().clone() };
        let entity = self.entity().ok_or_else(detached)?;
        let mut guard = entity.write().unwrap_or_else(PoisonError::into_inner);
        let mut inner = self.lock();
        if inner.busy {
            return Err(TrackError::Busy { entity: self.descriptor.type_name(), key: self.key.value().clone() });
        }
        if inner.state == HandleState::Invalid {
            return Err(detached());
        }
        if let (Some(field), Some(token)) = (self.descriptor.concurrency_field(), token.as_ref()) {
            field.write(&mut guard, token)?;
        }
        self.changes.clear();
        self.reset_clean(&mut inner, &guard);
        inner.token = token;
        inner.token_current = true;
        Ok(())
    }

    /// Stops tracking: the handle becomes Invalid, the instance lives on untracked.
    pub(crate) fn detach(&self) {
        let mut inner = self.lock();
        self.invalidate(&mut inner);
    }
}

fn mark<T>(inner: &mut HandleInner<T>, name: &'static str, current: &Value) {
    match inner.original.get(name) {
        Some(original) if original == current => {
            inner.dirty.remove(name);
        }
        Some(_) => {
            inner.dirty.insert(name);
        }
        None => {}
    }
}

#[cfg(test)]
mod handle_tests {
    use super::*;
    use crate::test_entities::*;

    fn fresh<T: Entity>(key: Value) -> (Arc<TrackedHandle<T>>, Shared<T>) {
        let descriptor = Arc::new(EntityDescriptor::<T>::of().unwrap());
        let key = descriptor.normalize_key(&key).unwrap();
        let (handle, entity) = TrackedHandle::create(descriptor, key, None).unwrap();
        handle.complete(&entity, Some(Value::Bytes(vec![1]))).unwrap();
        (handle, entity)
    }

    #[test]
    fn starts_initializing_and_completes_once() {
        let descriptor = Arc::new(EntityDescriptor::<Order>::of().unwrap());
        let key = descriptor.normalize_key(&Value::I32(5)).unwrap();
        let (handle, entity) = TrackedHandle::create(descriptor, key, None).unwrap();
        assert_eq!(handle.state(), HandleState::Initializing);
        assert_eq!(entity.read().unwrap().id, 5);

        handle.complete(&entity, Some(Value::Bytes(vec![1]))).unwrap();
        assert_eq!(handle.state(), HandleState::Unchanged);
        assert!(handle.is_token_current());
        assert!(matches!(handle.complete(&entity, None), Err(ConfigError::NotInitializing { .. })));
    }

    #[test]
    fn full_scan_edit_and_revert() {
        let (handle, order) = fresh::<Order>(Value::I32(1));
        order.write().unwrap().customer = "Bob".into();
        assert_eq!(handle.state(), HandleState::Modified);
        assert_eq!(handle.dirty_fields(), vec!["customer"]);
        assert_eq!(handle.original_value("customer"), Some(Value::Text(String::new())));

        order.write().unwrap().customer = String::new();
        assert_eq!(handle.state(), HandleState::Unchanged);
        assert!(handle.dirty_fields().is_empty());
    }

    #[test]
    fn optional_and_ignored_fields_never_dirty_the_handle() {
        let (handle, order) = fresh::<Order>(Value::I32(1));
        {
            let mut order = order.write().unwrap();
            order.note = Some("fragile".into());
            order.scratch.push("x".into());
        }
        assert_eq!(handle.state(), HandleState::Unchanged);
        assert_eq!(handle.original_value("note"), None);
    }

    #[test]
    fn cached_mode_only_sees_notified_edits() {
        let (handle, order) = fresh::<NotifiedOrder>(Value::I32(1));
        order.write().unwrap().set_customer("Bob".into());
        assert_eq!(handle.dirty_fields(), vec!["customer"]);

        order.write().unwrap().amount = 99.0;
        assert_eq!(handle.dirty_fields(), vec!["customer"]);

        order.write().unwrap().set_customer(String::new());
        assert_eq!(handle.state(), HandleState::Unchanged);
    }

    #[test]
    fn advanced_mode_records_originals_lazily() {
        let (handle, order) = fresh::<AuditedOrder>(Value::I32(1));
        assert_eq!(handle.original_value("customer"), None);

        order.write().unwrap().set_customer("Bob".into());
        order.write().unwrap().set_customer("Dave".into());
        assert_eq!(handle.state(), HandleState::Modified);
        assert_eq!(handle.original_value("customer"), Some(Value::Text(String::new())));
        assert_eq!(handle.original_value("amount"), None);

        order.write().unwrap().set_customer(String::new());
        assert_eq!(handle.state(), HandleState::Unchanged);
        assert_eq!(handle.original_value("customer"), None);
    }

    #[test]
    fn dropping_the_instance_invalidates_the_handle() {
        let (handle, order) = fresh::<Order>(Value::I32(1));
        drop(order);
        assert_eq!(handle.state(), HandleState::Invalid);
        assert!(handle.entity().is_none());
        assert!(handle.is_dead());
    }

    #[test]
    fn invalidation_detaches_the_notifier() {
        let (handle, order) = fresh::<NotifiedOrder>(Value::I32(1));
        assert_eq!(order.read().unwrap().events.observer_count(), 1);
        handle.detach();
        assert_eq!(order.read().unwrap().events.observer_count(), 0);
        assert_eq!(handle.state(), HandleState::Invalid);
    }

    #[test]
    fn accept_changes_adopts_token_and_cleans() {
        let (handle, order) = fresh::<Order>(Value::I32(1));
        order.write().unwrap().amount = 42.0;
        assert_eq!(handle.state(), HandleState::Modified);

        handle.accept_changes(Some(Value::Bytes(vec![2]))).unwrap();
        assert_eq!(handle.state(), HandleState::Unchanged);
        assert_eq!(handle.token(), Some(Value::Bytes(vec![2])));
        assert_eq!(order.read().unwrap().row_version, vec![2]);
        assert_eq!(handle.original_value("amount"), Some(Value::F64(42.0)));

        drop(order);
        assert!(matches!(handle.accept_changes(None), Err(TrackError::Detached { .. })));
    }

    #[test]
    fn decisions_follow_state_and_token() {
        let (handle, order) = fresh::<Order>(Value::I32(1));
        let same = Value::Bytes(vec![1]);
        let newer = Value::Bytes(vec![2]);

        assert!(matches!(handle.decide(Some(&same)).unwrap(), Decision::Existing(_)));

        order.write().unwrap().customer = "Bob".into();
        assert!(matches!(handle.decide(Some(&same)).unwrap(), Decision::Existing(_)));
        assert!(matches!(handle.decide(Some(&newer)).unwrap(), Decision::Merge(_)));
        assert!(matches!(handle.decide(Some(&newer)).unwrap(), Decision::Wait));
        handle.abandon(&order, LeaseKind::Merge);

        order.write().unwrap().customer = String::new();
        assert!(matches!(handle.decide(Some(&newer)).unwrap(), Decision::Reload(_)));
        assert_eq!(handle.state(), HandleState::Initializing);
        handle.abandon(&order, LeaseKind::Reload);
        assert_eq!(handle.state(), HandleState::Unchanged);
        assert_eq!(handle.token(), Some(same.clone()));
        assert!(!handle.is_token_current());
        // even the old token reloads now
        assert!(matches!(handle.decide(Some(&same)).unwrap(), Decision::Reload(_)));
        handle.abandon(&order, LeaseKind::Reload);
        drop(order);
        assert!(matches!(handle.decide(Some(&newer)).unwrap(), Decision::Replace));
    }

    #[test]
    fn untokened_dirty_handles_cannot_be_reconciled() {
        let (handle, item) = fresh::<Unversioned>(Value::I32(3));
        assert!(matches!(handle.decide(None).unwrap(), Decision::Reload(_)));
        handle.complete(&item, None).unwrap();

        item.write().unwrap().name = "edited".into();
        let err = handle.decide(None).err().unwrap();
        assert_eq!(err, TrackError::UnverifiableEdits { entity: "Unversioned", key: Value::I32(3) });
        assert!(!handle.is_token_current());
    }

    #[test]
    fn a_writer_does_not_deadlock_state_queries() {
        let (handle, order) = fresh::<Order>(Value::I32(1));
        let writer = {
            let order = Arc::clone(&order);
            std::thread::spawn(move || {
                let mut guard = order.write().unwrap();
                std::thread::sleep(std::time::Duration::from_millis(50));
                guard.customer = "Bob".into();
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        let _ = handle.state();
        writer.join().unwrap();
        assert_eq!(handle.state(), HandleState::Modified);
    }
}
