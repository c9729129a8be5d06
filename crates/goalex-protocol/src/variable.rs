//! The closed set of variable types used by goal and world object schemas.
//!
//! Decoding from the wire is total: absent, null or ill-typed input maps to
//! the zero value of the declared type. Encoding is the identity for every
//! variant except [`Value::Transform`], which is written as a map.

use std::fmt;
use std::str::FromStr;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::mode::ExecutiveMode;
use crate::transform::Transform;

const OBJECT_PREFIX: &str = "OBJECT:";

/// Declared type of a goal parameter, world object variable or world state key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariableType {
    Int64,
    Float64,
    Text,
    Bool,
    Transform,
    /// Uuid of a map.
    MapRef,
    /// Name of an animation.
    AnimationRef,
    ExecutiveMode,
    /// Uuid of a world object of the named object type.
    ObjectRef(String),
}

/// An in-memory variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int64(i64),
    Float64(f64),
    Text(String),
    Bool(bool),
    Transform(Transform),
    ExecutiveMode(ExecutiveMode),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown variable type `{0}`")]
pub struct UnknownVariableType(pub String);

impl VariableType {
    pub fn object(type_name: impl Into<String>) -> Self {
        Self::ObjectRef(type_name.into())
    }

    /// True if `value` is a member of this type.
    pub fn check(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Int64, Value::Int64(_))
                | (Self::Float64, Value::Float64(_))
                | (
                    Self::Text | Self::MapRef | Self::AnimationRef | Self::ObjectRef(_),
                    Value::Text(_)
                )
                | (Self::Bool, Value::Bool(_))
                | (Self::Transform, Value::Transform(_))
                | (Self::ExecutiveMode, Value::ExecutiveMode(_))
        )
    }

    /// Decode a loosely typed wire value. Never fails.
    pub fn from_wire(&self, raw: Option<&JsonValue>) -> Value {
        let raw = raw.filter(|raw| !raw.is_null());
        match self {
            Self::Int64 => Value::Int64(raw.map(int_from_wire).unwrap_or(0)),
            Self::Float64 => Value::Float64(raw.map(float_from_wire).unwrap_or(0.0)),
            Self::Text | Self::MapRef | Self::AnimationRef | Self::ObjectRef(_) => {
                Value::Text(raw.map(wire_text).unwrap_or_default())
            }
            Self::Bool => Value::Bool(match raw {
                Some(JsonValue::Bool(flag)) => *flag,
                Some(other) => wire_text(other).to_lowercase() == "true",
                None => false,
            }),
            Self::Transform => Value::Transform(
                raw.map(Transform::from_wire).unwrap_or_default(),
            ),
            Self::ExecutiveMode => Value::ExecutiveMode(
                raw.and_then(JsonValue::as_str)
                    .and_then(ExecutiveMode::from_name)
                    .unwrap_or_default(),
            ),
        }
    }
}

fn int_from_wire(raw: &JsonValue) -> i64 {
    match raw {
        JsonValue::Number(number) => number
            .as_i64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|value| value.is_finite() && value.fract() == 0.0)
                    .map(|value| value as i64)
            })
            .unwrap_or(0),
        JsonValue::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn float_from_wire(raw: &JsonValue) -> f64 {
    match raw {
        JsonValue::Number(number) => number.as_f64().unwrap_or(0.0),
        JsonValue::String(text) => text.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Strings pass through, anything else renders as its JSON text.
pub(crate) fn wire_text(raw: &JsonValue) -> String {
    match raw {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 => f.write_str("LONG"),
            Self::Float64 => f.write_str("DOUBLE"),
            Self::Text => f.write_str("STRING"),
            Self::Bool => f.write_str("BOOLEAN"),
            Self::Transform => f.write_str("TRANSFORM"),
            Self::MapRef => f.write_str("MAP"),
            Self::AnimationRef => f.write_str("ANIMATION"),
            Self::ExecutiveMode => f.write_str("EXECUTIVE_STATE"),
            Self::ObjectRef(type_name) => write!(f, "{OBJECT_PREFIX}{type_name}"),
        }
    }
}

impl FromStr for VariableType {
    type Err = UnknownVariableType;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let parsed = match name {
            "LONG" => Self::Int64,
            "DOUBLE" => Self::Float64,
            "STRING" => Self::Text,
            "BOOLEAN" => Self::Bool,
            "TRANSFORM" => Self::Transform,
            "MAP" => Self::MapRef,
            "ANIMATION" => Self::AnimationRef,
            "EXECUTIVE_STATE" => Self::ExecutiveMode,
            other => match other.strip_prefix(OBJECT_PREFIX) {
                Some(type_name) if !type_name.is_empty() => Self::object(type_name),
                _ => return Err(UnknownVariableType(other.to_owned())),
            },
        };
        Ok(parsed)
    }
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_transform(&self) -> Option<&Transform> {
        match self {
            Self::Transform(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_mode(&self) -> Option<ExecutiveMode> {
        match self {
            Self::ExecutiveMode(value) => Some(*value),
            _ => None,
        }
    }

    pub fn to_wire(&self) -> JsonValue {
        match self {
            Self::Int64(value) => (*value).into(),
            Self::Float64(value) => (*value).into(),
            Self::Text(value) => value.clone().into(),
            Self::Bool(value) => (*value).into(),
            Self::Transform(value) => value.to_wire(),
            Self::ExecutiveMode(value) => value.as_str().into(),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Transform> for Value {
    fn from(value: Transform) -> Self {
        Self::Transform(value)
    }
}

impl From<ExecutiveMode> for Value {
    fn from(value: ExecutiveMode) -> Self {
        Self::ExecutiveMode(value)
    }
}
