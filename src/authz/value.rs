//! Attribute values carried in actor/resource records and evaluation contexts.
//!
//! Values arrive as free-form JSON from the storage layer and callers; they are
//! converted once into [`AttrValue`] so the evaluator works over a closed set of
//! kinds. Timestamps and times of day never come out of JSON directly; the
//! engine produces them for the temporal block of the context.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authz::errors::AuthzError;

pub type Attributes = BTreeMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Time(NaiveTime),
    List(Vec<AttrValue>),
    Map(Attributes),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(n) => Some(*n as f64),
            AttrValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, AttrValue::Int(_) | AttrValue::Float(_))
    }

    /// Name of the value's kind. Int and Float share the `number` kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AttrValue::Null => "null",
            AttrValue::Bool(_) => "bool",
            AttrValue::Int(_) | AttrValue::Float(_) => "number",
            AttrValue::String(_) => "string",
            AttrValue::Timestamp(_) => "timestamp",
            AttrValue::Time(_) => "time",
            AttrValue::List(_) => "list",
            AttrValue::Map(_) => "map",
        }
    }

    /// String form used for template substitution and last-resort comparison.
    pub fn to_template_string(&self) -> String {
        match self {
            AttrValue::Null => "null".to_string(),
            AttrValue::Bool(b) => b.to_string(),
            AttrValue::Int(n) => n.to_string(),
            // Whole floats keep their decimal point: 5.0 renders as "5.0"
            AttrValue::Float(f) => format!("{f:?}"),
            AttrValue::String(s) => s.clone(),
            AttrValue::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
            AttrValue::Time(t) => t.format("%H:%M:%S").to_string(),
            AttrValue::List(_) | AttrValue::Map(_) => Value::from(self.clone()).to_string(),
        }
    }
}

impl From<Value> for AttrValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => AttrValue::Null,
            Value::Bool(b) => AttrValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttrValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    AttrValue::Float(f)
                } else {
                    AttrValue::Null
                }
            }
            Value::String(s) => AttrValue::String(s),
            Value::Array(items) => AttrValue::List(items.into_iter().map(AttrValue::from).collect()),
            Value::Object(map) => {
                AttrValue::Map(map.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect())
            }
        }
    }
}

impl From<AttrValue> for Value {
    fn from(value: AttrValue) -> Self {
        match value {
            AttrValue::Null => Value::Null,
            AttrValue::Bool(b) => Value::Bool(b),
            AttrValue::Int(n) => Value::from(n),
            AttrValue::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            AttrValue::String(s) => Value::String(s),
            AttrValue::Timestamp(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            AttrValue::Time(t) => Value::String(t.format("%H:%M:%S").to_string()),
            AttrValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            AttrValue::Map(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Int(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<Attributes> for AttrValue {
    fn from(map: Attributes) -> Self {
        AttrValue::Map(map)
    }
}

/// Converts a JSON object into an attribute map. Non-object input yields an
/// empty map.
pub fn attributes_from_json(value: Value) -> Attributes {
    match AttrValue::from(value) {
        AttrValue::Map(map) => map,
        _ => Attributes::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PathSegment {
    key: String,
    index: Option<usize>,
}

/// A dotted attribute path such as `resource.owner_id` or `user.tags[0]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl AttrPath {
    pub fn parse(raw: &str) -> Result<Self, AuthzError> {
        let mut segments = Vec::new();
        for part in raw.split('.') {
            segments.push(parse_segment(part).ok_or_else(|| {
                AuthzError::PolicyEvaluation(format!("invalid attribute path `{raw}`"))
            })?);
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walk the path through nested maps (and one list index per segment).
    /// Any missing key, non-map step, or out-of-range index yields `None`.
    pub fn resolve<'a>(&self, root: &'a Attributes) -> Option<&'a AttrValue> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = index_into(root.get(&first.key)?, first.index)?;
        for seg in rest {
            let AttrValue::Map(map) = current else {
                return None;
            };
            current = index_into(map.get(&seg.key)?, seg.index)?;
        }
        Some(current)
    }
}

fn index_into(value: &AttrValue, index: Option<usize>) -> Option<&AttrValue> {
    match index {
        None => Some(value),
        Some(i) => match value {
            AttrValue::List(items) => items.get(i),
            _ => None,
        },
    }
}

fn parse_segment(part: &str) -> Option<PathSegment> {
    let part = part.trim();
    match part.find('[') {
        None => {
            if part.is_empty() || part.contains(']') {
                return None;
            }
            Some(PathSegment {
                key: part.to_string(),
                index: None,
            })
        }
        Some(open) => {
            let key = &part[..open];
            let inner = part[open + 1..].strip_suffix(']')?;
            if key.is_empty() {
                return None;
            }
            let index = inner.parse::<usize>().ok()?;
            Some(PathSegment {
                key: key.to_string(),
                index: Some(index),
            })
        }
    }
}
