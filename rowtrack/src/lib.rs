//! rowtrack turns rows coming out of a SQL layer into typed entity instances and keeps at most one live instance
//! per entity key, so every query that returns the same row hands the application the same object.
//!
//! Entities declare their mapping with `#[derive(Entity)]`. Rows carrying a newer optimistic-concurrency token are
//! reconciled with the live instance: clean instances are reloaded in place, instances with local edits are merged
//! field by field and true conflicts are reported as [`TrackError::ConcurrencyMismatch`].
//!
//! Instances are held weakly by the identity map. Once the application releases an instance its handle becomes
//! Invalid and the next read of that key starts from scratch.

extern crate self as rowtrack;

pub mod descriptor;
pub mod engine;
pub mod error;
pub mod handle;
pub mod hydrate;
pub mod logger;
pub mod merge;
pub mod notify;
pub mod registry;
pub mod row;
pub mod settings;
pub mod tracker;
pub mod value;

#[cfg(test)]
mod test_entities;

pub use chrono;
pub use descriptor::{
    DirtyCheckMode, Entity, EntityDescriptor, EntityShape, FieldDescriptor, FieldKind, FieldMarker, FieldShape, NotifyKind,
    Shared,
};
pub use engine::Engine;
pub use error::{ConfigError, HydrationError, TrackError};
pub use handle::{HandleState, TrackedHandle};
pub use hydrate::{HydrationPlan, RowValues};
pub use log;
pub use macros::ColumnEnum;
pub use macros::Entity;
pub use merge::{ConcurrencyConflict, FieldConflict};
pub use notify::{ChangeEvent, ChangeNotifier, ChangeObserver};
pub use registry::Registry;
pub use row::{MemoryRow, Row, RowSet};
pub use settings::{EngineSettings, HydrationSettings, TrackingSettings};
pub use tracker::{Acquired, Lease, LeaseKind, Tracker};
pub use value::{ColumnEnum, ColumnError, FromColumn, KeyValue, ToColumn, Value, ValueKind};
