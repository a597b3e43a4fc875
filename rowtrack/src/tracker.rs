//! Identity map of one entity type: at most one live instance per key.
//!
//! Lookup and insertion happen under a single map lock, so two concurrent loads of an unseen key agree on one
//! instance. Hydrating the instance happens outside that lock: the winner receives a [`Lease`], losers wait on
//! the handle until the lease is finished or dropped and then re-evaluate.

use crate::descriptor::{Entity, EntityDescriptor, Shared};
use crate::error::{ConfigError, TrackError};
use crate::handle::{Decision, TrackedHandle};
use crate::hydrate::RowValues;
use crate::settings::TrackingSettings;
use crate::value::{KeyValue, ToColumn, Value};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseKind {
    /// Fresh instance, every field must be populated.
    Create,
    /// Existing clean instance, every field is overwritten.
    Reload,
    /// Existing instance with edits, the row must be merged.
    Merge,
}

/// Exclusive right to finish loading one instance. Dropping it unfinished gives the handle back: a created handle
/// becomes Invalid, a reloading one stays tracked and is reloaded by the next row, a merging one keeps its previous
/// content.
pub struct Lease<T: Entity> {
    handle: Arc<TrackedHandle<T>>,
    entity: Shared<T>,
    kind: LeaseKind,
    token: Option<Value>,
    finished: bool,
}

impl<T: Entity> Lease<T> {
    fn new(handle: Arc<TrackedHandle<T>>, entity: Shared<T>, kind: LeaseKind, token: Option<Value>) -> Self {
        Self { handle, entity, kind, token, finished: false }
    }

    pub fn kind(&self) -> LeaseKind {
        self.kind
    }

    pub fn handle(&self) -> &Arc<TrackedHandle<T>> {
        &self.handle
    }

    pub fn entity(&self) -> &Shared<T> {
        &self.entity
    }

    pub fn token(&self) -> Option<&Value> {
        self.token.as_ref()
    }

    fn wrong(&self, attempted: &'static str) -> TrackError {
        ConfigError::WrongCompletion {
            entity: self.handle.descriptor().type_name(),
            key: self.handle.key().value().clone(),
            lease: self.kind,
            attempted,
        }
        .into()
    }

    /// Finishes a Create or Reload lease once the caller has written every field.
    pub fn complete(mut self) -> Result<Shared<T>, TrackError> {
        if self.kind == LeaseKind::Merge {
            return Err(self.wrong("complete"));
        }
        self.finished = true;
        self.handle.complete(&self.entity, self.token.clone())?;
        Ok(Arc::clone(&self.entity))
    }

    /// Finishes a Merge lease with the coerced values of the fresh row.
    pub fn merge(mut self, values: &RowValues) -> Result<Shared<T>, TrackError> {
        if self.kind != LeaseKind::Merge {
            return Err(self.wrong("merge"));
        }
        self.finished = true;
        self.handle.merge(&self.entity, values.fields(), self.token.clone())?;
        Ok(Arc::clone(&self.entity))
    }
}

impl<T: Entity> Drop for Lease<T> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("{} key {} {:?} lease dropped unfinished", self.handle.descriptor().type_name(), self.handle.key(), self.kind);
            self.handle.abandon(&self.entity, self.kind);
        }
    }
}

pub enum Acquired<T: Entity> {
    /// Live instance whose token matches, the row is not applied.
    Existing { handle: Arc<TrackedHandle<T>>, entity: Shared<T> },
    /// Create or Reload lease, populate every field then [`Lease::complete`].
    Populate(Lease<T>),
    Merge(Lease<T>),
}

impl<T: Entity> Acquired<T> {
    pub fn handle(&self) -> &Arc<TrackedHandle<T>> {
        match self {
            Acquired::Existing { handle, .. } => handle,
            Acquired::Populate(lease) | Acquired::Merge(lease) => lease.handle(),
        }
    }

    pub fn entity(&self) -> &Shared<T> {
        match self {
            Acquired::Existing { entity, .. } => entity,
            Acquired::Populate(lease) | Acquired::Merge(lease) => lease.entity(),
        }
    }

    pub fn lease_kind(&self) -> Option<LeaseKind> {
        match self {
            Acquired::Existing { .. } => None,
            Acquired::Populate(lease) | Acquired::Merge(lease) => Some(lease.kind()),
        }
    }
}

pub struct Tracker<T: Entity> {
    descriptor: Arc<EntityDescriptor<T>>,
    handles: Mutex<HashMap<KeyValue, Arc<TrackedHandle<T>>>>,
    settings: TrackingSettings,
    created: AtomicUsize,
}

impl<T: Entity> Tracker<T> {
    pub fn new(descriptor: Arc<EntityDescriptor<T>>, settings: TrackingSettings) -> Result<Self, ConfigError> {
        descriptor.require_key()?;
        Ok(Self { descriptor, handles: Mutex::new(HashMap::new()), settings, created: AtomicUsize::new(0) })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<KeyValue, Arc<TrackedHandle<T>>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor<T>> {
        &self.descriptor
    }

    /// Atomic get-or-add by key. `token` is the concurrency token of the row about to be applied.
    ///
    /// Blocks while another lease on the same key is outstanding. Calling it again for a key whose lease the calling
    /// thread still holds therefore never returns: finish or drop the lease first.
    pub fn get_or_add<K: ToColumn + ?Sized>(&self, key: &K, token: Option<Value>) -> Result<Acquired<T>, TrackError> {
        let key = self.descriptor.normalize_key(&key.to_column())?;
        let token = self.descriptor.normalize_token(token)?;
        self.acquire(key, token)
    }

    pub(crate) fn acquire(&self, key: KeyValue, token: Option<Value>) -> Result<Acquired<T>, TrackError> {
        loop {
            let mut handles = self.lock();
            let Some(handle) = handles.get(&key).map(Arc::clone) else {
                return self.create(&mut handles, key, token);
            };
            match handle.decide(token.as_ref())? {
                Decision::Wait => {
                    drop(handles);
                    handle.wait_idle();
                }
                Decision::Contended(entity) => {
                    drop(handles);
                    drop(entity.read());
                }
                Decision::Replace => return self.create(&mut handles, key, token),
                Decision::Existing(entity) => return Ok(Acquired::Existing { handle, entity }),
                Decision::Reload(entity) => {
                    return Ok(Acquired::Populate(Lease::new(handle, entity, LeaseKind::Reload, token)));
                }
                Decision::Merge(entity) => return Ok(Acquired::Merge(Lease::new(handle, entity, LeaseKind::Merge, token))),
            }
        }
    }

    fn create(
        &self,
        handles: &mut HashMap<KeyValue, Arc<TrackedHandle<T>>>,
        key: KeyValue,
        token: Option<Value>,
    ) -> Result<Acquired<T>, TrackError> {
        let (handle, entity) = TrackedHandle::create(Arc::clone(&self.descriptor), key.clone(), token.clone())?;
        handles.insert(key, Arc::clone(&handle));
        let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        if self.settings.prune_every > 0 && created % self.settings.prune_every == 0 {
            let pruned = Self::sweep(handles);
            debug!("{} auto prune after {} creations removed {} handles", self.descriptor.type_name(), created, pruned);
        }
        Ok(Acquired::Populate(Lease::new(handle, entity, LeaseKind::Create, token)))
    }

    /// Hydrates an already coerced row through the identity map.
    pub fn hydrate(&self, values: &RowValues) -> Result<Shared<T>, TrackError> {
        let key = values.key().cloned().ok_or(ConfigError::NotTrackable { entity: self.descriptor.type_name() })?;
        match self.acquire(key, values.token().cloned())? {
            Acquired::Existing { entity, .. } => Ok(entity),
            Acquired::Populate(lease) => {
                {
                    let mut entity = lease.entity().write().unwrap_or_else(PoisonError::into_inner);
                    values.apply(&self.descriptor, &mut *entity)?;
                }
                lease.complete()
            }
            Acquired::Merge(lease) => lease.merge(values),
        }
    }

    pub fn handle<K: ToColumn + ?Sized>(&self, key: &K) -> Result<Option<Arc<TrackedHandle<T>>>, TrackError> {
        let key = self.descriptor.normalize_key(&key.to_column())?;
        Ok(self.lock().get(&key).map(Arc::clone))
    }

    /// Stops tracking `key`. The instance, if anyone still holds it, lives on untracked.
    pub fn forget<K: ToColumn + ?Sized>(&self, key: &K) -> Result<bool, TrackError> {
        let key = self.descriptor.normalize_key(&key.to_column())?;
        let removed = self.lock().remove(&key);
        Ok(match removed {
            Some(handle) => {
                handle.detach();
                true
            }
            None => false,
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<KeyValue> {
        self.lock().keys().cloned().collect()
    }

    /// Drops every handle whose instance has been released or that has been invalidated.
    pub fn prune_invalid(&self) -> usize {
        let pruned = Self::sweep(&mut self.lock());
        if pruned > 0 {
            info!("{} pruned {} invalid handles", self.descriptor.type_name(), pruned);
        }
        pruned
    }

    fn sweep(handles: &mut HashMap<KeyValue, Arc<TrackedHandle<T>>>) -> usize {
        let before = handles.len();
        handles.retain(|_, handle| !handle.is_dead());
        before - handles.len()
    }
}
