use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::core::{DbError, Result};

/// A scalar cell value as stored in a shard row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Total order used by sorting and merging: NULL sorts after every
    /// non-null value, integers and floats compare numerically, and any
    /// other cross-type pair is a `TypeMismatch`.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        use Value::*;
        let ordering = match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Greater,
            (_, Null) => Ordering::Less,
            (Integer(a), Integer(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (a, b) => match (a.numeric(), b.numeric()) {
                (Some(x), Some(y)) => total_float_order(x, y),
                _ => {
                    return Err(DbError::TypeMismatch(format!(
                        "Cannot compare incompatible types: {} and {}",
                        self.type_name(),
                        other.type_name()
                    )));
                }
            },
        };
        Ok(ordering)
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) => 1,
            Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Boolean(_) => 4,
            Value::Timestamp(_) => 5,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => DataType::Integer.name(),
            Value::Float(_) => DataType::Float.name(),
            Value::Text(_) => DataType::Text.name(),
            Value::Boolean(_) => DataType::Boolean.name(),
            Value::Timestamp(_) => DataType::Timestamp.name(),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0 && !f.is_nan(),
            Self::Text(s) => !s.is_empty(),
            Self::Timestamp(_) => true,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }

    /// Numeric addition. `NULL` absorbs, integer overflow is an error.
    pub fn add(&self, other: &Value) -> Result<Value> {
        self.arithmetic(other, "+", i64::checked_add, |a, b| a + b)
    }

    pub fn sub(&self, other: &Value) -> Result<Value> {
        self.arithmetic(other, "-", i64::checked_sub, |a, b| a - b)
    }

    pub fn mul(&self, other: &Value) -> Result<Value> {
        self.arithmetic(other, "*", i64::checked_mul, |a, b| a * b)
    }

    pub fn div(&self, other: &Value) -> Result<Value> {
        match other {
            Value::Integer(0) => Err(DbError::ExecutionError("Division by zero".into())),
            Value::Float(f) if *f == 0.0 => {
                Err(DbError::ExecutionError("Division by zero".into()))
            }
            _ => self.arithmetic(other, "/", i64::checked_div, |a, b| a / b),
        }
    }

    fn arithmetic(
        &self,
        other: &Value,
        symbol: &str,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Integer(a), Value::Integer(b)) => int_op(*a, *b)
                .map(Value::Integer)
                .ok_or_else(|| {
                    DbError::ExecutionError(format!("Integer overflow in {} {} {}", a, symbol, b))
                }),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                // both sides are numeric, as_f64 cannot fail
                let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                Ok(Value::Float(float_op(x, y)))
            }
            _ => Err(DbError::TypeMismatch(format!(
                "Cannot apply '{}' to {} and {}",
                symbol,
                self.type_name(),
                other.type_name()
            ))),
        }
    }
}

// NaN equals NaN and sorts above every other float.
fn total_float_order(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Integer(i), Value::Float(f)) | (Value::Float(f), Value::Integer(i)) => {
                integral(*f) == Some(*i)
            }
            _ => false,
        }
    }
}

/// The exact `i64` a float represents, if any.
fn integral(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is out of range
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (in_range && f.fract() == 0.0).then_some(f as i64)
}

impl Eq for Value {}

/// Operator ordering: unlike [`Value::compare`], NULL is the smallest value
/// and mismatched types are unordered.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            _ => self.compare(other).ok(),
        }
    }
}

/// Consistent with `PartialEq`: a float holding an exact integer hashes as
/// that integer, every NaN hashes alike.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Float(f) => match integral(*f) {
                Some(i) => Value::Integer(i).hash(state),
                None if f.is_nan() => (2u8, f64::NAN.to_bits()).hash(state),
                None => (2u8, f.to_bits()).hash(state),
            },
            Value::Null => self.tag().hash(state),
            Value::Integer(i) => (self.tag(), i).hash(state),
            Value::Text(s) => (self.tag(), s).hash(state),
            Value::Boolean(b) => (self.tag(), b).hash(state),
            Value::Timestamp(ts) => (self.tag(), ts).hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) if x.is_nan() => f.write_str("NaN"),
            Value::Float(x) if x.is_infinite() => {
                f.write_str(if x.is_sign_positive() { "Infinity" } else { "-Infinity" })
            }
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident($convert:expr)),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Value::$variant($convert(value))
                }
            }
        )*
    };
}

value_from! {
    i64 => Integer(|v| v),
    i32 => Integer(i64::from),
    f64 => Float(|v| v),
    String => Text(|v| v),
    &str => Text(str::to_owned),
    bool => Boolean(|v| v),
    DateTime<Utc> => Timestamp(|v| v),
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Declared type of an entity member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Float => "FLOAT",
            DataType::Text => "TEXT",
            DataType::Boolean => "BOOLEAN",
            DataType::Timestamp => "TIMESTAMP",
        }
    }

    /// NULL fits every type; integers widen into float members.
    pub fn is_compatible(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (DataType::Integer, Value::Integer(_))
                | (DataType::Float, Value::Float(_) | Value::Integer(_))
                | (DataType::Text, Value::Text(_))
                | (DataType::Boolean, Value::Boolean(_))
                | (DataType::Timestamp, Value::Timestamp(_))
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
