//! Process-wide home of descriptors and trackers, one slot per entity type.

use crate::descriptor::{Entity, EntityDescriptor};
use crate::error::ConfigError;
use crate::settings::TrackingSettings;
use crate::tracker::Tracker;
use log::info;
use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

trait TypeSlot: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn prune_invalid(&self) -> usize;
    fn tracked(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
}

struct Slot<T: Entity> {
    descriptor: OnceCell<Result<Arc<EntityDescriptor<T>>, ConfigError>>,
    tracker: OnceCell<Arc<Tracker<T>>>,
}

impl<T: Entity> Slot<T> {
    fn new() -> Self {
        Self { descriptor: OnceCell::new(), tracker: OnceCell::new() }
    }
}

impl<T: Entity> TypeSlot for Slot<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn prune_invalid(&self) -> usize {
        self.tracker.get().map_or(0, |tracker| tracker.prune_invalid())
    }

    fn tracked(&self) -> usize {
        self.tracker.get().map_or(0, |tracker| tracker.len())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct Registry {
    slots: RwLock<HashMap<TypeId, Arc<dyn TypeSlot>>>,
    tracking: TrackingSettings,
}

impl Registry {
    pub fn new(tracking: TrackingSettings) -> Self {
        Self { slots: RwLock::new(HashMap::new()), tracking }
    }

    fn slot<T: Entity>(&self) -> Arc<dyn TypeSlot> {
        let id = TypeId::of::<T>();
        if let Some(slot) = self.slots.read().unwrap_or_else(PoisonError::into_inner).get(&id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id).or_insert_with(|| Arc::new(Slot::<T>::new())))
    }

    fn with_slot<T: Entity, R>(&self, f: impl FnOnce(&Slot<T>) -> R) -> R {
        let slot = self.slot::<T>();
        let typed = slot.as_any().downcast_ref::<Slot<T>>().expect("registry slots are keyed by their TypeId");
        f(typed)
    }

    /// Built on first use. A type that fails validation keeps failing with the same error.
    pub fn descriptor<T: Entity>(&self) -> Result<Arc<EntityDescriptor<T>>, ConfigError> {
        self.with_slot::<T, _>(|slot| slot.descriptor.get_or_init(|| EntityDescriptor::of().map(Arc::new)).clone())
    }

    pub fn tracker<T: Entity>(&self) -> Result<Arc<Tracker<T>>, ConfigError> {
        let descriptor = self.descriptor::<T>()?;
        self.with_slot::<T, _>(|slot| {
            slot.tracker.get_or_try_init(|| Tracker::new(descriptor, self.tracking.clone()).map(Arc::new)).cloned()
        })
    }

    fn all_slots(&self) -> Vec<Arc<dyn TypeSlot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    pub fn prune_invalid(&self) -> usize {
        let pruned: usize = self.all_slots().iter().map(|slot| slot.prune_invalid()).sum();
        if pruned > 0 {
            info!("pruned {} invalid handles across all entity types", pruned);
        }
        pruned
    }

    /// Live handle count per tracked type, sorted by type name.
    pub fn tracked_counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<_> = self.all_slots().iter().map(|slot| (slot.type_name(), slot.tracked())).collect();
        counts.sort();
        counts
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;
    use crate::test_entities::*;
    use crate::value::Value;

    #[test]
    fn descriptors_and_trackers_are_built_once_per_type() {
        let registry = Registry::new(TrackingSettings::default());
        let a = registry.descriptor::<Order>().unwrap();
        let b = registry.descriptor::<Order>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let t1 = registry.tracker::<Order>().unwrap();
        let t2 = registry.tracker::<Order>().unwrap();
        assert!(Arc::ptr_eq(&t1, &t2));
        assert!(Arc::ptr_eq(t1.descriptor(), &a));
    }

    #[test]
    fn invalid_types_keep_their_error() {
        let registry = Registry::new(TrackingSettings::default());
        let err = ConfigError::DuplicateMarker { entity: "TwoKeys", marker: "key", first: "a", second: "b" };
        assert_eq!(registry.descriptor::<TwoKeys>().err(), Some(err.clone()));
        assert_eq!(registry.tracker::<TwoKeys>().err(), Some(err));
        assert_eq!(registry.tracker::<Tag>().err(), Some(ConfigError::NotTrackable { entity: "Tag" }));
        assert!(registry.descriptor::<Tag>().is_ok());
    }

    #[test]
    fn prune_sweeps_every_type() {
        let registry = Registry::new(TrackingSettings { enabled: true, prune_every: 0 });
        let orders = registry.tracker::<Order>().unwrap();
        let items = registry.tracker::<Unversioned>().unwrap();
        drop(orders.get_or_add(&1, Some(Value::Bytes(vec![1]))).unwrap());
        drop(items.get_or_add(&1, None).unwrap());
        assert_eq!(registry.tracked_counts().iter().map(|(_, n)| n).sum::<usize>(), 2);
        assert_eq!(registry.prune_invalid(), 2);
        assert!(orders.is_empty() && items.is_empty());
    }
}
