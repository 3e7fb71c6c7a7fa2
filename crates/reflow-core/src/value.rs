//! JSON shape classification
//!
//! Every stored value is a `serde_json::Value`. The write pipeline only ever
//! cares about the value's *shape* - whether it is absent, null, an array, an
//! object, or a scalar - because shape is what decides merge compatibility.

use serde_json::Value;
use std::fmt;

/// The shape of a value at a key
///
/// `Absent` is the JavaScript `undefined` of the data model: the key has no
/// value at all (never written, or deleted). `Null` is an explicit JSON null.
/// Everything that is neither array, object, nor null is a `Scalar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// No value present (`undefined`)
    Absent,
    /// Explicit JSON null
    Null,
    /// JSON array
    Array,
    /// Non-array JSON object
    Object,
    /// Bool, number, or string
    Scalar,
}

impl ValueKind {
    /// Classify an optional value
    pub fn of(value: Option<&Value>) -> ValueKind {
        match value {
            None => ValueKind::Absent,
            Some(Value::Null) => ValueKind::Null,
            Some(Value::Array(_)) => ValueKind::Array,
            Some(Value::Object(_)) => ValueKind::Object,
            Some(_) => ValueKind::Scalar,
        }
    }

    /// Check whether this kind carries no data (absent or null)
    pub fn is_nullish(&self) -> bool {
        matches!(self, ValueKind::Absent | ValueKind::Null)
    }

    /// Canonical lowercase name, used in log messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Absent => "undefined",
            ValueKind::Null => "null",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Scalar => "scalar",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
