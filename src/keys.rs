//! Key tuples and their canonical form.
//!
//! Uniqueness and reference checks compare values structurally across
//! documents, so every extracted value is first put into a canonical form:
//!
//! - numbers with the same numeric value compare equal (`1` == `1.0`);
//! - mappings compare by sorted key set;
//! - sequences compare element-wise;
//! - strings, booleans and null compare as themselves.
//!
//! Composite values (sequences, mappings) are canonicalized to their
//! sorted-key JSON text, which keeps [`KeyTuple`] cheap to hash and compare
//! while preserving structural equality.

use serde_json::Value;
use std::fmt;

/// A single canonicalized tuple element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Non-integral numbers, compared by bit pattern of their f64 form.
    Float(u64),
    Str(String),
    /// Sequences and mappings, canonicalized to sorted-key JSON text.
    Composite(String),
}

impl CanonValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => CanonValue::Null,
            Value::Bool(b) => CanonValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    CanonValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    // Integral floats collapse to integers so that a JSON
                    // `1` and a JSON `1.0` form the same key.
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        CanonValue::Int(f as i64)
                    } else {
                        CanonValue::Float(f.to_bits())
                    }
                } else {
                    CanonValue::Str(n.to_string())
                }
            }
            Value::String(s) => CanonValue::Str(s.clone()),
            Value::Array(_) | Value::Object(_) => CanonValue::Composite(canonical_json(value)),
        }
    }

    /// The JSON rendition used in reports.
    pub fn to_json(&self) -> Value {
        match self {
            CanonValue::Null => Value::Null,
            CanonValue::Bool(b) => Value::Bool(*b),
            CanonValue::Int(i) => Value::from(*i),
            CanonValue::Float(bits) => {
                serde_json::Number::from_f64(f64::from_bits(*bits))
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
            CanonValue::Str(s) => Value::String(s.clone()),
            CanonValue::Composite(text) => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
            }
        }
    }
}

impl fmt::Display for CanonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonValue::Null => write!(f, "null"),
            CanonValue::Bool(b) => write!(f, "{}", b),
            CanonValue::Int(i) => write!(f, "{}", i),
            CanonValue::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            CanonValue::Str(s) => write!(f, "{}", s),
            CanonValue::Composite(text) => write!(f, "{}", text),
        }
    }
}

/// Serializes a JSON value with object keys sorted and numbers in canonical
/// form, so structurally equal values produce identical text.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => match CanonValue::from_json(value) {
            CanonValue::Int(i) => out.push_str(&i.to_string()),
            _ => out.push_str(&n.to_string()),
        },
        Value::String(s) => {
            // serde_json string escaping is infallible for strings.
            out.push_str(&serde_json::to_string(s).unwrap_or_default());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// An ordered sequence of canonical values: the unit of uniqueness and
/// reference checking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyTuple(pub Vec<CanonValue>);

impl KeyTuple {
    /// A 1-tuple holding the whole value at a site.
    pub fn whole(value: &Value) -> Self {
        KeyTuple(vec![CanonValue::from_json(value)])
    }

    /// Builds a tuple from a configuration value: a bare scalar forms a
    /// 1-tuple, an array forms an n-tuple.
    pub fn from_config_value(value: &Value) -> Self {
        match value {
            Value::Array(items) => KeyTuple(items.iter().map(CanonValue::from_json).collect()),
            other => KeyTuple(vec![CanonValue::from_json(other)]),
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.0.iter().map(CanonValue::to_json).collect())
    }
}

impl fmt::Display for KeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

/// How a site turns the value at a location into a key tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberSpec {
    /// The value at the site itself is the tuple (a 1-tuple).
    Whole,
    /// The site must be a mapping; the tuple is the ordered list of values
    /// at these keys.
    Keys(Vec<String>),
}

/// A `Keys` member referenced a key that the mapping does not carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingMember {
    pub member: String,
}

impl fmt::Display for MissingMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key member '{}' is absent", self.member)
    }
}

/// Applies a member spec to the value found at a resolved location.
pub fn extract_tuple(value: &Value, spec: &MemberSpec) -> Result<KeyTuple, MissingMember> {
    match spec {
        MemberSpec::Whole => Ok(KeyTuple::whole(value)),
        MemberSpec::Keys(names) => {
            let mut elems = Vec::with_capacity(names.len());
            for name in names {
                let member = value.get(name).ok_or_else(|| MissingMember {
                    member: name.clone(),
                })?;
                elems.push(CanonValue::from_json(member));
            }
            Ok(KeyTuple(elems))
        }
    }
}
