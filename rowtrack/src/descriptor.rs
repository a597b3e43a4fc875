//! Per-type metadata: which field is the key, which holds the concurrency token, how every other field is
//! classified, and the compiled accessors hydration and merging go through.
//!
//! `#[derive(Entity)]` emits an [`EntityShape`], a raw description of the struct with one accessor triple per
//! mapped field. [`EntityDescriptor::build`] validates it and classifies the fields. The build happens once per
//! type inside a [`Registry`](crate::registry::Registry), the descriptor is immutable afterwards.

use crate::error::{ConfigError, HydrationError};
use crate::notify::{ChangeNotifier, ChangeObserver};
use crate::value::{ColumnError, KeyValue, Value, ValueKind};
use chrono::Utc;
use log::debug;
use std::sync::{Arc, RwLock, Weak};

/// A live, shared entity instance. The tracker only ever holds it weakly.
pub type Shared<T> = Arc<RwLock<T>>;

pub trait Entity: Default + Send + Sync + Sized + 'static {
    fn entity_shape() -> EntityShape<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMarker {
    Key,
    Concurrency,
    Required,
    Optional,
    LoadedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    /// Field name only.
    Plain,
    /// Field name with old and new value.
    WithValues,
}

pub struct FieldShape<T> {
    pub name: &'static str,
    pub column: Option<&'static str>,
    pub marker: FieldMarker,
    pub declared: ValueKind,
    pub get: fn(&T) -> Value,
    pub set: fn(&mut T, &Value) -> Result<(), ColumnError>,
    /// Converts a raw column value into the representation `get` produces, or fails like `set` would.
    pub coerce: fn(&Value) -> Result<Value, ColumnError>,
}

pub struct EntityShape<T> {
    pub type_name: &'static str,
    pub fields: Vec<FieldShape<T>>,
    pub ignored: Vec<&'static str>,
    pub notifier: Option<(NotifyKind, fn(&mut T) -> &mut ChangeNotifier)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Key,
    Concurrency,
    Required,
    /// The column may be absent from a query.
    Optional,
    /// Never read or written by hydration.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyCheckMode {
    /// No notification, every state query diffs all required fields against their originals.
    FullScan,
    /// Field-name notifications, only notified fields are re-read and diffed.
    Cached,
    /// Notifications carry old and new values, originals are recorded lazily on first edit.
    Advanced,
}

pub struct FieldDescriptor<T> {
    entity: &'static str,
    name: &'static str,
    column: &'static str,
    kind: FieldKind,
    loaded_at: bool,
    declared: ValueKind,
    get: fn(&T) -> Value,
    set: fn(&mut T, &Value) -> Result<(), ColumnError>,
    coerce: fn(&Value) -> Result<Value, ColumnError>,
}

impl<T> FieldDescriptor<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn column(&self) -> &'static str {
        self.column
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn declared(&self) -> ValueKind {
        self.declared
    }

    pub fn is_loaded_at(&self) -> bool {
        self.loaded_at
    }

    pub fn read(&self, entity: &T) -> Value {
        (self.get)(entity)
    }

    pub fn write(&self, entity: &mut T, value: &Value) -> Result<(), HydrationError> {
        (self.set)(entity, value).map_err(|e| HydrationError::from_column(self.entity, self.name, e))
    }

    pub fn coerce(&self, value: &Value) -> Result<Value, HydrationError> {
        (self.coerce)(value).map_err(|e| HydrationError::from_column(self.entity, self.name, e))
    }
}

pub struct EntityDescriptor<T> {
    type_name: &'static str,
    fields: Vec<FieldDescriptor<T>>,
    ignored: Vec<&'static str>,
    key: Option<usize>,
    concurrency: Option<usize>,
    loaded_at: Option<usize>,
    tracked: Vec<usize>,
    mode: DirtyCheckMode,
    notifier: Option<fn(&mut T) -> &mut ChangeNotifier>,
}

fn claim(
    slot: &mut Option<usize>,
    idx: usize,
    shape_fields: &[&'static str],
    entity: &'static str,
    marker: &'static str,
) -> Result<(), ConfigError> {
    match *slot {
        Some(first) => Err(ConfigError::DuplicateMarker { entity, marker, first: shape_fields[first], second: shape_fields[idx] }),
        None => {
            *slot = Some(idx);
            Ok(())
        }
    }
}

impl<T: Entity> EntityDescriptor<T> {
    pub fn of() -> Result<Self, ConfigError> {
        Self::build(T::entity_shape())
    }
}

impl<T> EntityDescriptor<T> {
    pub fn build(shape: EntityShape<T>) -> Result<Self, ConfigError> {
        let entity = shape.type_name;
        let names: Vec<&'static str> = shape.fields.iter().map(|f| f.name).collect();
        let mut key = None;
        let mut concurrency = None;
        let mut loaded_at = None;
        let mut tracked = Vec::new();
        let mut fields = Vec::with_capacity(shape.fields.len());

        for (idx, field) in shape.fields.into_iter().enumerate() {
            let kind = match field.marker {
                FieldMarker::Key => {
                    claim(&mut key, idx, &names, entity, "key")?;
                    FieldKind::Key
                }
                FieldMarker::Concurrency => {
                    claim(&mut concurrency, idx, &names, entity, "concurrency")?;
                    FieldKind::Concurrency
                }
                FieldMarker::LoadedAt => {
                    claim(&mut loaded_at, idx, &names, entity, "column(loaded_at)")?;
                    if field.declared != ValueKind::Timestamp {
                        return Err(ConfigError::LoadedAtType { entity, field: field.name, declared: field.declared });
                    }
                    FieldKind::Optional
                }
                FieldMarker::Required => {
                    tracked.push(idx);
                    FieldKind::Required
                }
                FieldMarker::Optional => FieldKind::Optional,
            };
            fields.push(FieldDescriptor {
                entity,
                name: field.name,
                column: field.column.unwrap_or(field.name),
                kind,
                loaded_at: field.marker == FieldMarker::LoadedAt,
                declared: field.declared,
                get: field.get,
                set: field.set,
                coerce: field.coerce,
            });
        }

        if let (None, Some(idx)) = (key, concurrency) {
            return Err(ConfigError::ConcurrencyWithoutKey { entity, field: names[idx] });
        }

        let (mode, notifier) = match shape.notifier {
            None => (DirtyCheckMode::FullScan, None),
            Some((NotifyKind::Plain, accessor)) => (DirtyCheckMode::Cached, Some(accessor)),
            Some((NotifyKind::WithValues, accessor)) => (DirtyCheckMode::Advanced, Some(accessor)),
        };

        debug!(
            "{} descriptor: {} mapped fields, {} tracked, {} ignored, {:?}",
            entity,
            fields.len(),
            tracked.len(),
            shape.ignored.len(),
            mode
        );

        Ok(Self { type_name: entity, fields, ignored: shape.ignored, key, concurrency, loaded_at, tracked, mode, notifier })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn trackable(&self) -> bool {
        self.key.is_some()
    }

    pub fn mode(&self) -> DirtyCheckMode {
        self.mode
    }

    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> &FieldDescriptor<T> {
        &self.fields[idx]
    }

    pub fn field_named(&self, name: &str) -> Option<(usize, &FieldDescriptor<T>)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// Classification of any declared field, ignored ones included.
    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.field_named(name)
            .map(|(_, f)| f.kind)
            .or_else(|| self.ignored.iter().any(|i| *i == name).then_some(FieldKind::Ignored))
    }

    pub fn ignored(&self) -> &[&'static str] {
        &self.ignored
    }

    pub fn key_field(&self) -> Option<&FieldDescriptor<T>> {
        self.key.map(|idx| &self.fields[idx])
    }

    pub fn concurrency_field(&self) -> Option<&FieldDescriptor<T>> {
        self.concurrency.map(|idx| &self.fields[idx])
    }

    pub fn loaded_at_field(&self) -> Option<&FieldDescriptor<T>> {
        self.loaded_at.map(|idx| &self.fields[idx])
    }

    pub(crate) fn key_index(&self) -> Option<usize> {
        self.key
    }

    pub(crate) fn concurrency_index(&self) -> Option<usize> {
        self.concurrency
    }

    /// Required fields, the only ones with originals and dirty flags.
    pub fn tracked_fields(&self) -> impl Iterator<Item = &FieldDescriptor<T>> {
        self.tracked.iter().map(|&idx| &self.fields[idx])
    }

    pub(crate) fn tracked_field(&self, name: &str) -> Option<&FieldDescriptor<T>> {
        self.tracked_fields().find(|f| f.name == name)
    }

    pub(crate) fn require_key(&self) -> Result<&FieldDescriptor<T>, ConfigError> {
        self.key_field().ok_or(ConfigError::NotTrackable { entity: self.type_name })
    }

    pub(crate) fn normalize_key(&self, raw: &Value) -> Result<KeyValue, crate::TrackError> {
        Ok(KeyValue::new(self.require_key()?.coerce(raw)?))
    }

    /// Tokens are only meaningful when a concurrency field exists, otherwise they are dropped.
    pub(crate) fn normalize_token(&self, token: Option<Value>) -> Result<Option<Value>, HydrationError> {
        match (self.concurrency_field(), token) {
            (Some(field), Some(token)) => field.coerce(&token).map(Some),
            _ => Ok(None),
        }
    }

    pub(crate) fn stamp_loaded_at(&self, entity: &mut T) -> Result<(), HydrationError> {
        match self.loaded_at_field() {
            Some(field) => field.write(entity, &Value::Timestamp(Utc::now())),
            None => Ok(()),
        }
    }

    pub(crate) fn subscribe(&self, entity: &mut T, observer: Weak<dyn ChangeObserver>) {
        if let Some(accessor) = self.notifier {
            accessor(entity).register(observer);
        }
    }

    pub(crate) fn unsubscribe(&self, entity: &mut T, observer: &Weak<dyn ChangeObserver>) {
        if let Some(accessor) = self.notifier {
            accessor(entity).deregister(observer);
        }
    }
}

impl<T: Default> EntityDescriptor<T> {
    pub(crate) fn instantiate(&self, key: &KeyValue) -> Result<T, HydrationError> {
        let mut entity = T::default();
        if let Some(field) = self.key_field() {
            field.write(&mut entity, key.value())?;
        }
        Ok(entity)
    }
}
