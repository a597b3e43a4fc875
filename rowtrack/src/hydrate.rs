//! Column binding and per-row value extraction.
//!
//! A [`HydrationPlan`] binds every mapped field to a column ordinal once per result set. Reading a row coerces
//! every bound value before anything is written, so a conversion failure leaves tracked instances untouched.

use crate::descriptor::{EntityDescriptor, FieldKind};
use crate::error::HydrationError;
use crate::row::Row;
use crate::value::{KeyValue, Value};
use log::debug;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct Binding {
    field: usize,
    ordinal: usize,
}

pub struct HydrationPlan<T> {
    descriptor: Arc<EntityDescriptor<T>>,
    bindings: Vec<Binding>,
    width: usize,
}

/// Coerced values of one row, keyed by field index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowValues {
    fields: Vec<(usize, Value)>,
    key: Option<KeyValue>,
    token: Option<Value>,
}

impl RowValues {
    pub fn fields(&self) -> &[(usize, Value)] {
        &self.fields
    }

    pub fn key(&self) -> Option<&KeyValue> {
        self.key.as_ref()
    }

    pub fn token(&self) -> Option<&Value> {
        self.token.as_ref()
    }

    /// Writes every value into `entity` and stamps the loaded-at field.
    pub fn apply<T>(&self, descriptor: &EntityDescriptor<T>, entity: &mut T) -> Result<(), HydrationError> {
        for (idx, value) in &self.fields {
            descriptor.field(*idx).write(entity, value)?;
        }
        descriptor.stamp_loaded_at(entity)
    }
}

impl<T> HydrationPlan<T> {
    pub fn build<R: Row>(descriptor: Arc<EntityDescriptor<T>>, row: &R, case_insensitive: bool) -> Result<Self, HydrationError> {
        let mut bindings = Vec::with_capacity(descriptor.fields().len());
        for (idx, field) in descriptor.fields().iter().enumerate() {
            if field.is_loaded_at() {
                continue;
            }
            let ordinal = if case_insensitive { row.ordinal_ignore_case(field.column()) } else { row.ordinal(field.column()) };
            match (ordinal, field.kind()) {
                (Some(ordinal), _) => bindings.push(Binding { field: idx, ordinal }),
                (None, FieldKind::Optional) => {
                    debug!("{}.{} left unbound, no column `{}`", descriptor.type_name(), field.name(), field.column())
                }
                (None, _) => {
                    return Err(HydrationError::ColumnRequired {
                        entity: descriptor.type_name(),
                        field: field.name().to_string(),
                        column: field.column().to_string(),
                    });
                }
            }
        }
        debug!("{} plan binds {} of {} columns", descriptor.type_name(), bindings.len(), row.column_count());
        Ok(Self { width: row.column_count(), descriptor, bindings })
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor<T>> {
        &self.descriptor
    }

    /// `(field, ordinal)` pairs in field declaration order.
    pub fn bindings(&self) -> Vec<(&'static str, usize)> {
        self.bindings.iter().map(|b| (self.descriptor.field(b.field).name(), b.ordinal)).collect()
    }

    pub fn is_bound(&self, field: &str) -> bool {
        self.bindings.iter().any(|b| self.descriptor.field(b.field).name() == field)
    }

    pub fn read<R: Row>(&self, row: &R) -> Result<RowValues, HydrationError> {
        if row.column_count() != self.width {
            return Err(HydrationError::ShapeChanged {
                entity: self.descriptor.type_name(),
                expected: self.width,
                actual: row.column_count(),
            });
        }
        let mut values = RowValues { fields: Vec::with_capacity(self.bindings.len()), key: None, token: None };
        for binding in &self.bindings {
            let field = self.descriptor.field(binding.field);
            let value = field.coerce(row.value(binding.ordinal))?;
            match field.kind() {
                FieldKind::Key => values.key = Some(KeyValue::new(value.clone())),
                FieldKind::Concurrency => values.token = Some(value.clone()),
                _ => {}
            }
            values.fields.push((binding.field, value));
        }
        Ok(values)
    }
}

impl<T: Default> HydrationPlan<T> {
    /// Builds a standalone instance, bypassing any identity map.
    pub fn instantiate(&self, values: &RowValues) -> Result<T, HydrationError> {
        let mut entity = T::default();
        values.apply(&self.descriptor, &mut entity)?;
        Ok(entity)
    }
}
