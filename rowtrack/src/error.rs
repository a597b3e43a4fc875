use crate::handle::HandleState;
use crate::merge::ConcurrencyConflict;
use crate::tracker::LeaseKind;
use crate::value::{ColumnError, Value, ValueKind};
use thiserror::Error;

/// Mistakes in how an entity type is declared or how the tracking API is driven. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{entity} has no #[key] field and cannot be tracked")]
    NotTrackable { entity: &'static str },

    #[error("{entity} declares #[concurrency] field `{field}` but no #[key] field")]
    ConcurrencyWithoutKey { entity: &'static str, field: &'static str },

    #[error("{entity} declares more than one #[{marker}] field: `{first}` and `{second}`")]
    DuplicateMarker { entity: &'static str, marker: &'static str, first: &'static str, second: &'static str },

    #[error("{entity}.{field} is marked #[column(loaded_at)] but is declared as {declared}, expected timestamp")]
    LoadedAtType { entity: &'static str, field: &'static str, declared: ValueKind },

    #[error("{entity} key {key} is {state:?}, hydration can only be completed once from Initializing")]
    NotInitializing { entity: &'static str, key: Value, state: HandleState },

    #[error("{entity} key {key} holds a {lease:?} lease, it cannot be finished with `{attempted}`")]
    WrongCompletion { entity: &'static str, key: Value, lease: LeaseKind, attempted: &'static str },
}

/// Per-row failure while turning a row into field values. Fatal to the read that hit it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HydrationError {
    #[error("{entity}.{field} requires column `{column}`, which is missing from the result; add the column or mark the field #[column(optional)]")]
    ColumnRequired { entity: &'static str, field: String, column: String },

    #[error("{entity}.{field} expects {expected}, the column holds {actual}")]
    Mapping { entity: &'static str, field: String, expected: ValueKind, actual: ValueKind },

    #[error("{entity}.{field} cannot take {value}: {reason}")]
    PostMapping { entity: &'static str, field: String, value: String, reason: String },

    #[error("{entity} plan was built for {expected} columns, row has {actual}")]
    ShapeChanged { entity: &'static str, expected: usize, actual: usize },
}

impl HydrationError {
    pub fn from_column(entity: &'static str, field: &str, err: ColumnError) -> Self {
        match err {
            ColumnError::Mismatch { expected, actual } => {
                HydrationError::Mapping { entity, field: field.to_string(), expected, actual }
            }
            ColumnError::Invalid { value, reason } => {
                HydrationError::PostMapping { entity, field: field.to_string(), value, reason }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("hydration error: {0}")]
    Hydration(#[from] HydrationError),

    #[error("{0}")]
    ConcurrencyMismatch(ConcurrencyConflict),

    #[error("{entity} key {key} has local edits and no #[concurrency] field, the fresh row cannot be reconciled")]
    UnverifiableEdits { entity: &'static str, key: Value },

    #[error("{entity} key {key} is being hydrated or merged by another caller")]
    Busy { entity: &'static str, key: Value },

    #[error("{entity} key {key} is no longer tracked")]
    Detached { entity: &'static str, key: Value },
}

impl From<ConcurrencyConflict> for TrackError {
    fn from(conflict: ConcurrencyConflict) -> Self {
        TrackError::ConcurrencyMismatch(conflict)
    }
}

impl TrackError {
    pub fn conflict(&self) -> Option<&ConcurrencyConflict> {
        match self {
            TrackError::ConcurrencyMismatch(conflict) => Some(conflict),
            _ => None,
        }
    }
}
