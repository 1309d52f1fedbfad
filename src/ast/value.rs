use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Runtime value types produced by evaluation and stored in run fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Boolean(bool),
    Missing,
}

// Manual implementation to handle f64
impl Eq for Value {}

// Manual implementation to handle f64 by hashing its bits
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Value::Text(s) => s.hash(state),
            Value::Number(n) => n.to_bits().hash(state),
            Value::Date(d) => d.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Missing => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Boolean(b) => write!(f, "{}", b),
            // Missing renders as empty text in templates
            Value::Missing => Ok(()),
        }
    }
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Name of the variant, used in type mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "Text",
            Value::Number(_) => "Number",
            Value::Date(_) => "Date",
            Value::Boolean(_) => "Boolean",
            Value::Missing => "Missing",
        }
    }

    /// Converts into the JSON shape used by the upload payload.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Date(_) => serde_json::Value::String(self.to_string()),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Missing => serde_json::Value::Null,
        }
    }

    /// Maps a plain JSON value (as found in context files and legacy records) into a `Value`.
    ///
    /// Strings stay text even when they look like dates; coercion happens at comparison time.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Missing),
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Null => Value::Missing,
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// Where a reference inside an expression looks for its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Unqualified name: run fields, then contact attributes, then org constants.
    Name(String),
    /// `flow.<key>`: run fields only.
    Field(String),
    /// `contact.<key>`: contact attributes only.
    Contact(String),
    /// `org.<key>`: organization constants only.
    Org(String),
    /// `input` or `step.value`: the response currently being processed.
    Input,
    /// `date.today`: supplied by the engine with the evaluation context.
    Today,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Name(name) => write!(f, "{}", name),
            Reference::Field(key) => write!(f, "flow.{}", key),
            Reference::Contact(key) => write!(f, "contact.{}", key),
            Reference::Org(key) => write!(f, "org.{}", key),
            Reference::Input => write!(f, "input"),
            Reference::Today => write!(f, "date.today"),
        }
    }
}
