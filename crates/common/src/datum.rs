use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Runtime value carried by constant expression descriptors, partition
/// specs, and aggregation keys.
///
/// Equality and hashing are total (floats compare by bit pattern) so
/// values can key hash tables. Cross-type numeric comparison widens both
/// sides to `f64`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Str(String),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int8(v) => Some(*v as i64),
            Datum::Int16(v) => Some(*v as i64),
            Datum::Int32(v) => Some(*v as i64),
            Datum::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Float32(v) => Some(*v as f64),
            Datum::Float64(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Three-way comparison with numeric widening; `None` when the values
    /// are not comparable (null involved, or mixed non-numeric kinds).
    pub fn compare(&self, other: &Datum) -> Option<Ordering> {
        match (self, other) {
            (Datum::Null, _) | (_, Datum::Null) => None,
            (Datum::Boolean(a), Datum::Boolean(b)) => Some(a.cmp(b)),
            (Datum::Str(a), Datum::Str(b)) => Some(a.cmp(b)),
            (a, b) => {
                let (x, y) = (a.as_f64()?, b.as_f64()?);
                x.partial_cmp(&y)
            }
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Datum::Null, Datum::Null) => true,
            (Datum::Boolean(a), Datum::Boolean(b)) => a == b,
            (Datum::Str(a), Datum::Str(b)) => a == b,
            (Datum::Float32(a), Datum::Float32(b)) => a.to_bits() == b.to_bits(),
            (Datum::Float64(a), Datum::Float64(b)) => a.to_bits() == b.to_bits(),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl Eq for Datum {}

impl Hash for Datum {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Datum::Null => 0u8.hash(state),
            Datum::Boolean(b) => b.hash(state),
            Datum::Int8(v) => (*v as i64).hash(state),
            Datum::Int16(v) => (*v as i64).hash(state),
            Datum::Int32(v) => (*v as i64).hash(state),
            Datum::Int64(v) => v.hash(state),
            Datum::Float32(v) => v.to_bits().hash(state),
            Datum::Float64(v) => v.to_bits().hash(state),
            Datum::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Boolean(b) => write!(f, "{b}"),
            Datum::Int8(v) => write!(f, "{v}"),
            Datum::Int16(v) => write!(f, "{v}"),
            Datum::Int32(v) => write!(f, "{v}"),
            Datum::Int64(v) => write!(f, "{v}"),
            Datum::Float32(v) => write!(f, "{v}"),
            Datum::Float64(v) => write!(f, "{v}"),
            Datum::Str(s) => write!(f, "{s}"),
        }
    }
}
