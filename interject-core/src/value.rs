//! Dynamic value model carried through interceptor pipelines and updates.

use std::collections::BTreeMap;

use crate::subject::SubjectHandle;

/// Language-neutral type token for a declared property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Bool,
    Int,
    Float,
    String,
    /// A reference to another subject.
    Subject,
    /// An ordered list (scalar or subject elements).
    List,
    /// A string-keyed dictionary (scalar or subject values).
    Dict,
    /// An application-defined token, carried opaquely.
    Custom(&'static str),
}

/// A JSON-like value extended with subject references.
///
/// `Value` is what flows through read/write pipelines, change events, and
/// `SubjectUpdate` construction. Equality is value equality, except that
/// [`Value::Subject`] compares by identity and [`Value::Float`] compares by
/// bit pattern (so `PartialEq` stays total and `NaN == NaN` holds for the
/// equality short-circuit).
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Subject(SubjectHandle),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Subject(a), Value::Subject(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    /// Collections always pass the equality short-circuit: two structurally
    /// equal lists may still be semantically new references.
    pub fn is_collection(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// True if this value is, or structurally contains, a subject reference.
    pub fn contains_subjects(&self) -> bool {
        match self {
            Value::Subject(_) => true,
            Value::List(items) => items.iter().any(Value::contains_subjects),
            Value::Map(entries) => entries.values().any(Value::contains_subjects),
            _ => false,
        }
    }

    pub fn as_subject(&self) -> Option<&SubjectHandle> {
        match self {
            Value::Subject(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a plain JSON value. Returns `None` if the value contains a
    /// subject reference anywhere — subjects only cross the wire as
    /// `SubjectUpdate` identifiers.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Value::Int(i) => Some(serde_json::Value::from(*i)),
            Value::Float(x) => serde_json::Number::from_f64(*x).map(serde_json::Value::Number),
            Value::String(s) => Some(serde_json::Value::String(s.clone())),
            Value::Subject(_) => None,
            Value::List(items) => items
                .iter()
                .map(Value::to_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(serde_json::Value::Object),
        }
    }

    /// Build a `Value` from plain JSON. Integral numbers become `Int`, other
    /// numbers `Float`.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<SubjectHandle> for Value {
    fn from(v: SubjectHandle) -> Self {
        Value::Subject(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}
