//! Dynamic values flowing through script execution.
//!
//! Every variable, expression result, and extraction result is a [`Value`].
//! Values convert freely between numbers and strings at use sites; a `set`
//! never fails on a type mismatch.

use std::collections::BTreeMap;
use std::fmt;

/// A dynamically typed script value.
///
/// Numbers are double-precision floats regardless of how they were written.
/// Arrays are used uniformly whether they came from a JSON literal, a
/// `split` call, or a JSONPath extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Num(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Renders whole numbers without a trailing `.0` so that `set $n 5` prints
/// and interpolates as `5`, not `5.0`.
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Value {
    /// Stringification used for interpolation and comparisons.
    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// Numeric coercion. Strings parse as `f64` when possible; booleans map
    /// to 0/1; anything else is not a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Truthiness: false for null, `false`, zero, the empty string, and the
    /// literal strings `"false"` and `"0"`. Everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty() && s != "false" && s != "0",
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Length as reported by the `length` function: element count for
    /// arrays, key count for objects, character count for plain strings.
    /// Strings holding a JSON array literal count its elements.
    pub fn length(&self) -> usize {
        match self {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.starts_with('[') && trimmed.ends_with(']') {
                    parse_json_array(s)
                        .map(|items| items.len())
                        .unwrap_or_else(|| split_bracketed_list(s).len())
                } else {
                    s.chars().count()
                }
            }
            _ => 0,
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Num(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Parses a string as a JSON array, returning its elements as values.
/// Returns `None` when the string is not a JSON array literal.
pub fn parse_json_array(s: &str) -> Option<Vec<Value>> {
    let trimmed = s.trim();
    if !trimmed.starts_with('[') || !trimmed.ends_with(']') {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Array(items)) => {
            Some(items.iter().map(Value::from_json).collect())
        }
        _ => None,
    }
}

/// Splits a bracketed list on commas, trimming whitespace and surrounding
/// quotes from each element. Fallback for lists that are not valid JSON.
pub fn split_bracketed_list(s: &str) -> Vec<Value> {
    let inner = s.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|part| part.trim().trim_matches(|c| c == '"' || c == '\''))
        .filter(|part| !part.is_empty())
        .map(|part| Value::Str(part.to_string()))
        .collect()
}
