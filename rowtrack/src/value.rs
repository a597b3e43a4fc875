//! Column values as they come out of a row and the strict conversions between them and entity fields.
//!
//! Conversions never widen: an `i32` field only accepts [`Value::I32`], an `f64` field only [`Value::F64`].
//! A mismatch is a [`ColumnError::Mismatch`], a value of the right kind that still cannot be turned into the
//! field type (unknown enum member, multi-character text for a `char`) is a [`ColumnError::Invalid`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    Text,
    Bytes,
    Timestamp,
    /// Integer ordinal or variant name, see [`ColumnEnum`].
    Enum,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::I16(_) => ValueKind::I16,
            Value::I32(_) => ValueKind::I32,
            Value::I64(_) => ValueKind::I64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::I16 => "i16",
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Text => "text",
            ValueKind::Bytes => "bytes",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Enum => "enum (ordinal or name)",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Bytes(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// Identity-map key. Floats compare and hash by their bit pattern so the key is a proper `Eq + Hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValue(Value);

impl KeyValue {
    pub fn new(value: Value) -> Self {
        KeyValue(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for KeyValue {
    fn from(value: Value) -> Self {
        KeyValue(value)
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Value::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

impl Eq for KeyValue {}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::I16(v) => v.hash(state),
            Value::I32(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::F32(v) => v.to_bits().hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Field-agnostic conversion failure, lifted into a `HydrationError` by the descriptor that knows the field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ColumnError {
    #[error("expected {expected}, found {actual}")]
    Mismatch { expected: ValueKind, actual: ValueKind },

    #[error("{value} is not accepted: {reason}")]
    Invalid { value: String, reason: String },
}

pub trait FromColumn: Sized {
    /// Declared kind, reported in mapping errors.
    const KIND: ValueKind;

    fn from_column(value: &Value) -> Result<Self, ColumnError>;
}

pub trait ToColumn {
    fn to_column(&self) -> Value;
}

fn mismatch<T>(expected: ValueKind, value: &Value) -> Result<T, ColumnError> {
    Err(ColumnError::Mismatch { expected, actual: value.kind() })
}

macro_rules! impl_column_for_primitive {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl FromColumn for $t {
                const KIND: ValueKind = ValueKind::$variant;

                fn from_column(value: &Value) -> Result<Self, ColumnError> {
                    match value {
                        Value::$variant(v) => Ok(v.clone()),
                        other => mismatch(Self::KIND, other),
                    }
                }
            }

            impl ToColumn for $t {
                fn to_column(&self) -> Value {
                    Value::$variant(self.clone())
                }
            }
        )*
    };
}

impl_column_for_primitive!(
    bool => Bool,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => Text,
    Vec<u8> => Bytes,
    DateTime<Utc> => Timestamp
);

impl FromColumn for char {
    const KIND: ValueKind = ValueKind::Text;

    fn from_column(value: &Value) -> Result<Self, ColumnError> {
        match value {
            Value::Text(text) => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(ColumnError::Invalid {
                        value: format!("{text:?}"),
                        reason: format!("expected exactly one character, found {}", text.chars().count()),
                    }),
                }
            }
            other => mismatch(Self::KIND, other),
        }
    }
}

impl ToColumn for char {
    fn to_column(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl<T: FromColumn> FromColumn for Option<T> {
    const KIND: ValueKind = T::KIND;

    fn from_column(value: &Value) -> Result<Self, ColumnError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_column(other).map(Some),
        }
    }
}

impl<T: ToColumn> ToColumn for Option<T> {
    fn to_column(&self) -> Value {
        match self {
            Some(v) => v.to_column(),
            None => Value::Null,
        }
    }
}

impl ToColumn for Value {
    fn to_column(&self) -> Value {
        self.clone()
    }
}

impl ToColumn for str {
    fn to_column(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl ToColumn for [u8] {
    fn to_column(&self) -> Value {
        Value::Bytes(self.to_vec())
    }
}

/// Fieldless enum stored either as its discriminant or as its variant name.
/// Implemented by `#[derive(ColumnEnum)]`, which also wires up [`FromColumn`] and [`ToColumn`].
pub trait ColumnEnum: Sized {
    const NAME: &'static str;

    fn from_ordinal(ordinal: i64) -> Option<Self>;
    /// Case-insensitive.
    fn from_name(name: &str) -> Option<Self>;
    fn ordinal(&self) -> i64;
}

pub fn enum_from_column<E: ColumnEnum>(value: &Value) -> Result<E, ColumnError> {
    let unknown = |shown: String| ColumnError::Invalid {
        value: shown,
        reason: format!("no member of {} matches", E::NAME),
    };
    match value {
        Value::I16(v) => E::from_ordinal(i64::from(*v)).ok_or_else(|| unknown(v.to_string())),
        Value::I32(v) => E::from_ordinal(i64::from(*v)).ok_or_else(|| unknown(v.to_string())),
        Value::I64(v) => E::from_ordinal(*v).ok_or_else(|| unknown(v.to_string())),
        Value::Text(text) => {
            let trimmed = text.trim();
            E::from_name(trimmed)
                .or_else(|| trimmed.parse::<i64>().ok().and_then(E::from_ordinal))
                .ok_or_else(|| unknown(format!("{text:?}")))
        }
        other => mismatch(ValueKind::Enum, other),
    }
}

pub fn enum_to_column<E: ColumnEnum>(value: &E) -> Value {
    Value::I64(value.ordinal())
}

#[cfg(test)]
mod value_tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, PartialEq)]
    enum Status {
        Pending = 1,
        Shipped = 2,
    }

    impl ColumnEnum for Status {
        const NAME: &'static str = "Status";

        fn from_ordinal(ordinal: i64) -> Option<Self> {
            match ordinal {
                1 => Some(Status::Pending),
                2 => Some(Status::Shipped),
                _ => None,
            }
        }

        fn from_name(name: &str) -> Option<Self> {
            if name.eq_ignore_ascii_case("Pending") {
                Some(Status::Pending)
            } else if name.eq_ignore_ascii_case("Shipped") {
                Some(Status::Shipped)
            } else {
                None
            }
        }

        fn ordinal(&self) -> i64 {
            match self {
                Status::Pending => 1,
                Status::Shipped => 2,
            }
        }
    }

    #[test]
    fn numeric_widening_is_refused() {
        let err = i64::from_column(&Value::I32(7)).unwrap_err();
        assert_eq!(err, ColumnError::Mismatch { expected: ValueKind::I64, actual: ValueKind::I32 });
        assert!(f64::from_column(&Value::F32(1.5)).is_err());
        assert_eq!(i32::from_column(&Value::I32(7)).unwrap(), 7);
    }

    #[test]
    fn null_only_fits_optional_fields() {
        assert_eq!(Option::<String>::from_column(&Value::Null).unwrap(), None);
        assert_eq!(Option::<String>::from_column(&Value::Text("a".into())).unwrap(), Some("a".to_string()));
        let err = String::from_column(&Value::Null).unwrap_err();
        assert_eq!(err, ColumnError::Mismatch { expected: ValueKind::Text, actual: ValueKind::Null });
        assert_eq!(None::<i32>.to_column(), Value::Null);
    }

    #[test]
    fn char_accepts_exactly_one_character() {
        assert_eq!(char::from_column(&Value::Text("x".into())).unwrap(), 'x');
        assert!(matches!(char::from_column(&Value::Text("xy".into())), Err(ColumnError::Invalid { .. })));
        assert!(matches!(char::from_column(&Value::Text(String::new())), Err(ColumnError::Invalid { .. })));
        assert!(matches!(char::from_column(&Value::I32(1)), Err(ColumnError::Mismatch { .. })));
    }

    #[test]
    fn enums_accept_ordinal_or_case_insensitive_name() {
        assert_eq!(enum_from_column::<Status>(&Value::I32(2)).unwrap(), Status::Shipped);
        assert_eq!(enum_from_column::<Status>(&Value::Text("pEnDiNg".into())).unwrap(), Status::Pending);
        assert_eq!(enum_from_column::<Status>(&Value::Text("2".into())).unwrap(), Status::Shipped);
        assert_eq!(enum_to_column(&Status::Shipped), Value::I64(2));

        match enum_from_column::<Status>(&Value::Text("lost".into())) {
            Err(ColumnError::Invalid { value, reason }) => {
                assert_eq!(value, "\"lost\"");
                assert!(reason.contains("Status"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(enum_from_column::<Status>(&Value::I64(9)), Err(ColumnError::Invalid { .. })));
        assert!(matches!(enum_from_column::<Status>(&Value::Bool(true)), Err(ColumnError::Mismatch { .. })));
    }

    #[test]
    fn float_keys_hash_by_bits() {
        let mut keys = HashSet::new();
        keys.insert(KeyValue::new(Value::F64(f64::NAN)));
        assert!(keys.contains(&KeyValue::new(Value::F64(f64::NAN))));
        assert_ne!(KeyValue::new(Value::I32(1)), KeyValue::new(Value::I64(1)));
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(Value::Bytes(vec![0x01, 0xab]).to_string(), "0x01ab");
        assert_eq!(Value::Text("Bob".into()).to_string(), "\"Bob\"");
        assert_eq!(ValueKind::Enum.to_string(), "enum (ordinal or name)");
    }
}
