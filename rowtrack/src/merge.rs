//! Three-way merge of a fresh row into an instance that carries local edits.
//!
//! For each required field the current value, the last clean (original) value and the incoming database value
//! are compared. Edits the database did not touch survive, fields only the database changed are taken, and a
//! field both sides changed differently is overwritten with the database value and reported.

use crate::descriptor::{DirtyCheckMode, EntityDescriptor, FieldKind};
use crate::error::HydrationError;
use crate::value::Value;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConflict {
    pub field: &'static str,
    /// The local edit that was discarded.
    pub application: Value,
    /// The value now held by the instance.
    pub database: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcurrencyConflict {
    pub entity: &'static str,
    pub key: Value,
    pub conflicts: Vec<FieldConflict>,
}

impl ConcurrencyConflict {
    pub fn new(entity: &'static str, key: Value, conflicts: Vec<FieldConflict>) -> Self {
        Self { entity, key, conflicts }
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.conflicts.iter().map(|c| c.field)
    }

    pub fn conflict(&self, field: &str) -> Option<&FieldConflict> {
        self.conflicts.iter().find(|c| c.field == field)
    }
}

impl fmt::Display for ConcurrencyConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "concurrency mismatch on {} key {}:", self.entity, self.key)?;
        for (i, c) in self.conflicts.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{} (application {}, database {})", c.field, c.application, c.database)?;
        }
        Ok(())
    }
}

fn refresh_original(mode: DirtyCheckMode, original: &mut HashMap<&'static str, Value>, field: &'static str, value: &Value) {
    match mode {
        DirtyCheckMode::Advanced => {
            original.remove(field);
        }
        DirtyCheckMode::FullScan | DirtyCheckMode::Cached => {
            original.insert(field, value.clone());
        }
    }
}

/// Applies `incoming` (field index, already coerced value) to `entity`. The caller has brought `dirty` up to date.
/// Returns the conflicting fields; they have been overwritten and marked clean already.
pub(crate) fn merge_fields<T>(
    descriptor: &EntityDescriptor<T>,
    entity: &mut T,
    original: &mut HashMap<&'static str, Value>,
    dirty: &mut BTreeSet<&'static str>,
    mode: DirtyCheckMode,
    incoming: &[(usize, Value)],
) -> Result<Vec<FieldConflict>, HydrationError> {
    let mut conflicts = Vec::new();
    for (idx, value) in incoming {
        let field = descriptor.field(*idx);
        match field.kind() {
            FieldKind::Key | FieldKind::Ignored => {}
            FieldKind::Concurrency | FieldKind::Optional => field.write(entity, value)?,
            FieldKind::Required => {
                let name = field.name();
                let current = field.read(entity);
                if current == *value {
                    dirty.remove(name);
                    refresh_original(mode, original, name, value);
                } else if !dirty.contains(name) {
                    field.write(entity, value)?;
                    refresh_original(mode, original, name, value);
                } else if original.get(name) == Some(value) {
                    // database still holds what the edit started from
                } else {
                    field.write(entity, value)?;
                    dirty.remove(name);
                    refresh_original(mode, original, name, value);
                    conflicts.push(FieldConflict { field: name, application: current, database: value.clone() });
                }
            }
        }
    }
    Ok(conflicts)
}
