//! The closed value type every decoded property and event field ends up as.

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Serialize, Serializer};

use super::math::{Vector, VectorXY};

/// A decoded property or event field value.
///
/// `Absent` means "never set by any baseline or delta" and is distinct from
/// a zero or empty value.
#[derive(Debug, Clone, Default)]
pub enum PropValue {
    #[default]
    Absent,
    Integer(i64),
    Float(f32),
    Bool(bool),
    String(String),
    Vector(Vector),
    VectorXY(VectorXY),
    Array(Vec<PropValue>),
}

impl PropValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, PropValue::Absent)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::Integer(i) => Some(*i),
            PropValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            PropValue::Float(f) => Some(*f),
            PropValue::Integer(i) => Some(*i as f32),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vector> {
        match self {
            PropValue::Vector(v) => Some(*v),
            PropValue::VectorXY(v) => Some(v.xyz()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Short name of the variant, used for column typing and diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PropValue::Absent => "absent",
            PropValue::Integer(_) => "integer",
            PropValue::Float(_) => "float",
            PropValue::Bool(_) => "bool",
            PropValue::String(_) => "string",
            PropValue::Vector(_) => "vector",
            PropValue::VectorXY(_) => "vector_xy",
            PropValue::Array(_) => "array",
        }
    }

    /// Parses the textual form used on the command line for prop state
    /// filters: `true`/`false`, integers, floats, anything else is a string.
    pub fn parse_loose(text: &str) -> PropValue {
        match text {
            "true" => PropValue::Bool(true),
            "false" => PropValue::Bool(false),
            _ => {
                if let Ok(i) = text.parse::<i64>() {
                    PropValue::Integer(i)
                } else if let Ok(f) = text.parse::<f32>() {
                    PropValue::Float(f)
                } else {
                    PropValue::String(text.to_string())
                }
            }
        }
    }

    /// Equality used by prop state filters: integers and bools compare by
    /// numeric value, everything else by exact equality.
    pub fn loosely_equals(&self, other: &PropValue) -> bool {
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        use PropValue::*;
        match (self, other) {
            (Absent, Absent) => true,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => OrderedFloat(*a) == OrderedFloat(*b),
            (Bool(a), Bool(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Vector(a), Vector(b)) => a == b,
            (VectorXY(a), VectorXY(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PropValue {}

impl Hash for PropValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            PropValue::Absent => {}
            PropValue::Integer(i) => i.hash(state),
            PropValue::Float(f) => OrderedFloat(*f).hash(state),
            PropValue::Bool(b) => b.hash(state),
            PropValue::String(s) => s.hash(state),
            PropValue::Vector(v) => v.hash(state),
            PropValue::VectorXY(v) => v.hash(state),
            PropValue::Array(values) => values.hash(state),
        }
    }
}

impl Display for PropValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PropValue::Absent => write!(f, "<absent>"),
            PropValue::Integer(i) => write!(f, "{}", i),
            PropValue::Float(x) => write!(f, "{}", x),
            PropValue::Bool(b) => write!(f, "{}", b),
            PropValue::String(s) => write!(f, "{}", s),
            PropValue::Vector(v) => write!(f, "{}", v),
            PropValue::VectorXY(v) => write!(f, "{}", v),
            PropValue::Array(values) => write!(f, "[{}]", values.iter().join(", ")),
        }
    }
}

// Absent serializes as null, which is what consumers of the json output
// expect for "no value".
impl Serialize for PropValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PropValue::Absent => serializer.serialize_none(),
            PropValue::Integer(i) => serializer.serialize_i64(*i),
            PropValue::Float(f) => serializer.serialize_f32(*f),
            PropValue::Bool(b) => serializer.serialize_bool(*b),
            PropValue::String(s) => serializer.serialize_str(s),
            PropValue::Vector(v) => v.serialize(serializer),
            PropValue::VectorXY(v) => v.serialize(serializer),
            PropValue::Array(values) => values.serialize(serializer),
        }
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Integer(value)
    }
}

impl From<f32> for PropValue {
    fn from(value: f32) -> Self {
        PropValue::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::String(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::String(value.to_string())
    }
}

impl From<Vector> for PropValue {
    fn from(value: Vector) -> Self {
        PropValue::Vector(value)
    }
}

impl<T: Into<PropValue>> From<Option<T>> for PropValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PropValue::Absent, Into::into)
    }
}
