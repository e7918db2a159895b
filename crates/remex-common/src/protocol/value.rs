//! The value model carried over the wire.
//!
//! Every engine value that crosses a connection is first lowered into a
//! [`Value`]. Live callables never travel: they are replaced by
//! [`Value::FnRef`], which only carries the arity the receiving side needs to
//! build a proxy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::protocol::error::{RemexError, Result};

/// Deepest nesting a value may have and still decode on the peer.
///
/// A scalar has depth 1 and every list or map adds one. Each level costs two
/// JSON levels and the payload envelope a few more, which has to stay under
/// the decoder's recursion limit of 128.
pub const MAX_VALUE_DEPTH: usize = 56;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// An engine symbol, distinct from a string with the same text.
    Symbol(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Marker for a callable that stayed on the remote side.
    FnRef { arity: usize },
    /// Descriptive failure text returned in place of a result.
    Error(String),
}

impl Value {
    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(message.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of `Int` and `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&str> {
        match self {
            Value::Error(message) => Some(message),
            _ => None,
        }
    }

    /// Arity of a remote function reference.
    pub fn fn_arity(&self) -> Option<usize> {
        match self {
            Value::FnRef { arity } => Some(*arity),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Checks that the value survives encoding and decoding unchanged.
    ///
    /// Fails for values nested deeper than [`MAX_VALUE_DEPTH`] and for NaN or
    /// infinite floats, which JSON cannot represent.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: usize) -> Result<()> {
        if depth > MAX_VALUE_DEPTH {
            return Err(RemexError::InvalidRequest(format!(
                "value nested deeper than {} levels",
                MAX_VALUE_DEPTH
            )));
        }
        match self {
            Value::Float(f) if !f.is_finite() => Err(RemexError::InvalidRequest(format!(
                "float {} has no wire form",
                f
            ))),
            Value::List(items) => items.iter().try_for_each(|item| item.validate_at(depth + 1)),
            Value::Map(map) => map.values().try_for_each(|item| item.validate_at(depth + 1)),
            _ => Ok(()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::List(iter.into_iter().collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Symbol(name) => write!(f, ":{}", name),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{:?}:{}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::FnRef { arity } => write!(f, "<remote fn/{}>", arity),
            Value::Error(message) => write!(f, "error: {}", message),
        }
    }
}
