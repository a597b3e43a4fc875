use crate::descriptor::{Entity, EntityDescriptor, Shared};
use crate::error::{ConfigError, TrackError};
use crate::hydrate::HydrationPlan;
use crate::registry::Registry;
use crate::row::Row;
use crate::settings::EngineSettings;
use crate::tracker::Tracker;
use std::sync::{Arc, RwLock};

/// Entry point for the SQL layer: turns rows into tracked instances.
pub struct Engine {
    registry: Registry,
    settings: EngineSettings,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { registry: Registry::new(settings.tracking.clone()), settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn descriptor<T: Entity>(&self) -> Result<Arc<EntityDescriptor<T>>, ConfigError> {
        self.registry.descriptor::<T>()
    }

    pub fn tracker<T: Entity>(&self) -> Result<Arc<Tracker<T>>, ConfigError> {
        self.registry.tracker::<T>()
    }

    pub fn plan<T: Entity, R: Row>(&self, row: &R) -> Result<HydrationPlan<T>, TrackError> {
        let descriptor = self.descriptor::<T>()?;
        Ok(HydrationPlan::build(descriptor, row, self.settings.hydration.case_insensitive_columns)?)
    }

    /// Hydrates one row. `plan` is built from the first row and reused for the rest of the result set.
    pub fn hydrate<T: Entity, R: Row>(&self, row: &R, plan: &mut Option<HydrationPlan<T>>) -> Result<Shared<T>, TrackError> {
        let plan = match plan {
            Some(plan) => plan,
            None => plan.insert(self.plan(row)?),
        };
        let values = plan.read(row)?;
        if !self.settings.tracking.enabled {
            return Ok(Arc::new(RwLock::new(plan.instantiate(&values)?)));
        }
        self.tracker::<T>()?.hydrate(&values)
    }

    pub fn load<T, I>(&self, rows: I) -> Result<Vec<Shared<T>>, TrackError>
    where
        T: Entity,
        I: IntoIterator,
        I::Item: Row,
    {
        let mut plan = None;
        rows.into_iter().map(|row| self.hydrate(&row, &mut plan)).collect()
    }

    /// Plain instances, never registered in any identity map. Works for keyless types.
    pub fn load_untracked<T, I>(&self, rows: I) -> Result<Vec<T>, TrackError>
    where
        T: Entity,
        I: IntoIterator,
        I::Item: Row,
    {
        let mut plan: Option<HydrationPlan<T>> = None;
        let mut loaded = Vec::new();
        for row in rows {
            let plan = match &mut plan {
                Some(plan) => plan,
                None => plan.insert(self.plan(&row)?),
            };
            loaded.push(plan.instantiate(&plan.read(&row)?)?);
        }
        Ok(loaded)
    }

    pub fn prune_invalid(&self) -> usize {
        self.registry.prune_invalid()
    }
}

#[cfg(test)]
mod engine_tests {
    use super::*;
    use crate::handle::HandleState;
    use crate::row::{MemoryRow, RowSet};
    use crate::settings::TrackingSettings;
    use crate::test_entities::*;
    use crate::value::Value;

    fn orders(rows: &[(i32, &str, u8)]) -> RowSet {
        let mut set = RowSet::new(["Id", "Amount", "Customer", "Status", "RowVersion"]);
        for (id, customer, version) in rows {
            set.push(vec![
                Value::I32(*id),
                Value::F64(10.0),
                Value::Text(customer.to_string()),
                Value::I32(0),
                Value::Bytes(vec![*version]),
            ]);
        }
        set
    }

    #[test]
    fn same_rows_yield_the_same_instances() {
        let engine = Engine::default();
        let first = engine.load::<Order, _>(orders(&[(1, "Alice", 1), (2, "Bob", 1)])).unwrap();
        let second = engine.load::<Order, _>(orders(&[(1, "Alice", 1), (2, "Bob", 1)])).unwrap();
        assert!(first.iter().zip(&second).all(|(a, b)| Arc::ptr_eq(a, b)));
        assert_eq!(first[0].read().unwrap().status, OrderStatus::Pending);
    }

    #[test]
    fn newer_row_reloads_clean_instance() {
        let engine = Engine::default();
        let first = engine.load::<Order, _>(orders(&[(1, "Alice", 1)])).unwrap();
        let second = engine.load::<Order, _>(orders(&[(1, "Carol", 2)])).unwrap();
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(first[0].read().unwrap().customer, "Carol");
        let handle = engine.tracker::<Order>().unwrap().handle(&1).unwrap().unwrap();
        assert_eq!(handle.state(), HandleState::Unchanged);
        assert_eq!(handle.token(), Some(Value::Bytes(vec![2])));
    }

    #[test]
    fn conflicting_edit_is_reported_and_overwritten() {
        let engine = Engine::default();
        let order = engine.load::<Order, _>(orders(&[(1, "Alice", 1)])).unwrap().remove(0);
        order.write().unwrap().customer = "Bob".into();

        let err = engine.load::<Order, _>(orders(&[(1, "Carol", 2)])).unwrap_err();
        let conflict = err.conflict().unwrap();
        assert_eq!(conflict.conflict("customer").map(|c| &c.application), Some(&Value::Text("Bob".into())));
        assert_eq!(order.read().unwrap().customer, "Carol");
        assert_eq!(order.read().unwrap().row_version, vec![2]);
    }

    #[test]
    fn disabled_tracking_returns_fresh_instances() {
        let mut settings = EngineSettings::default();
        settings.tracking = TrackingSettings { enabled: false, prune_every: 0 };
        let engine = Engine::new(settings);
        let first = engine.load::<Order, _>(orders(&[(1, "Alice", 1)])).unwrap();
        let second = engine.load::<Order, _>(orders(&[(1, "Alice", 1)])).unwrap();
        assert!(!Arc::ptr_eq(&first[0], &second[0]));
        assert!(engine.tracker::<Order>().unwrap().is_empty());
    }

    #[test]
    fn keyless_types_load_untracked_only() {
        let engine = Engine::default();
        let rows = vec![MemoryRow::from_pairs([("name", Value::Text("red".into())), ("weight", Value::I32(3))])];
        let tags = engine.load_untracked::<Tag, _>(rows.clone()).unwrap();
        assert_eq!(tags[0].name, "red");
        let err = engine.load::<Tag, _>(rows).err();
        assert_eq!(err, Some(TrackError::Config(ConfigError::NotTrackable { entity: "Tag" })));
    }

    #[test]
    fn unknown_enum_member_fails_before_tracking() {
        let engine = Engine::default();
        let rows = RowSet::new(["Id", "Amount", "Customer", "Status", "RowVersion"]).with_row(vec![
            Value::I32(1),
            Value::F64(10.0),
            Value::Text("Alice".into()),
            Value::Text("lost".into()),
            Value::Bytes(vec![1]),
        ]);
        let err = engine.load::<Order, _>(rows).unwrap_err();
        assert_eq!(
            err,
            TrackError::Hydration(crate::error::HydrationError::PostMapping {
                entity: "Order",
                field: "status".into(),
                value: "\"lost\"".into(),
                reason: "no member of OrderStatus matches".into()
            })
        );
        assert!(engine.tracker::<Order>().unwrap().is_empty());
    }

    #[test]
    fn missing_required_column_fails_the_read() {
        let engine = Engine::default();
        let rows = RowSet::new(["Id", "RowVersion"]).with_row(vec![Value::I32(1), Value::Bytes(vec![1])]);
        let err = engine.load::<Order, _>(rows).unwrap_err();
        assert!(matches!(err, TrackError::Hydration(crate::error::HydrationError::ColumnRequired { .. })));
    }
}
