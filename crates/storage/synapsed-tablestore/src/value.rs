//! Cell and value types
//!
//! Cells and values are strings, finite numbers or booleans. Numbers that
//! are NaN or infinite are representable (so that a bad write can be
//! reported) but never pass validation.

use serde::{Deserialize, Serialize, Serializer};
use std::{cmp::Ordering, fmt};

/// Identifier of a table, row, cell or value
pub type Id = String;

/// A cell or value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
}

/// Cells share the value type
pub type Cell = Value;

/// Type of a cell or value, as named in schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
}

impl ValueType {
    /// Parse a schema type name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ValueType::String),
            "number" => Some(ValueType::Number),
            "boolean" => Some(ValueType::Boolean),
            _ => None,
        }
    }
}

impl Value {
    /// Type of this value, or `None` if it is a non-finite number
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::String(_) => Some(ValueType::String),
            Value::Number(number) if number.is_finite() => Some(ValueType::Number),
            Value::Number(_) => None,
            Value::Boolean(_) => Some(ValueType::Boolean),
        }
    }

    /// Whether this value may be stored without a schema
    pub fn is_valid(&self) -> bool {
        self.value_type().is_some()
    }

    /// Convert a parsed JSON value; anything but a string, number or
    /// boolean yields `None`
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::String(string) => Some(Value::String(string.clone())),
            serde_json::Value::Number(number) => number.as_f64().map(Value::Number),
            serde_json::Value::Bool(boolean) => Some(Value::Boolean(*boolean)),
            _ => None,
        }
    }

    /// String content, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(string) => Some(string),
            _ => None,
        }
    }

    /// Numeric content, if this is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(boolean) => Some(*boolean),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
        }
    }
}

/// Total order used for sorting rows: missing values first, then booleans,
/// numbers and strings, each in their natural order
pub fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => a.type_rank().cmp(&b.type_rank()),
        },
    }
}

/// Format a number the way JavaScript's `JSON.stringify` does
pub fn js_number(number: f64) -> String {
    if !number.is_finite() {
        return "null".to_string();
    }
    if number == 0.0 {
        return "0".to_string();
    }
    let magnitude = number.abs();
    if magnitude >= 1e21 {
        format!("{number:e}").replacen('e', "e+", 1)
    } else if magnitude < 1e-6 {
        format!("{number:e}")
    } else {
        format!("{number}")
    }
}

/// JSON text of an optional value exactly as JavaScript would produce it.
/// This feeds the content hash, so it must not change.
pub fn js_json(value: Option<&Value>) -> String {
    match value {
        None => "null".to_string(),
        Some(Value::String(string)) => {
            serde_json::to_string(string).unwrap_or_else(|_| "null".to_string())
        }
        Some(Value::Number(number)) => js_number(*number),
        Some(Value::Boolean(boolean)) => boolean.to_string(),
    }
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::String(string) => serializer.serialize_str(string),
            Value::Number(number) if number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER => {
                serializer.serialize_i64(*number as i64)
            }
            Value::Number(number) => serializer.serialize_f64(*number),
            Value::Boolean(boolean) => serializer.serialize_bool(*boolean),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(string) => f.write_str(string),
            Value::Number(number) => f.write_str(&js_number(*number)),
            Value::Boolean(boolean) => write!(f, "{boolean}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}
