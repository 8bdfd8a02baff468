//! Stock payload types and accessor helpers.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::token::{MergeError, Payload, Token};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("wrong payload type: expected {expected}, got {actual}")]
    WrongType {
        expected: &'static str,
        actual: String,
    },
    #[error("can't parse payload {raw:?} as integer: {source}")]
    Parse {
        raw: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

impl Payload for u64 {}
impl Payload for i64 {}
impl Payload for String {}

/// Additively mergeable counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Counter(pub u64);

impl Payload for Counter {
    const MERGEABLE: bool = true;

    fn merge(self, other: Self) -> Result<Self, MergeError> {
        self.0
            .checked_add(other.0)
            .map(Counter)
            .ok_or_else(|| MergeError::Overflow {
                left: self.to_string(),
                right: other.to_string(),
            })
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors collected while a token travels through the net.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorList {
    errors: Vec<String>,
}

impl ErrorList {
    pub fn add_error(&mut self, err: impl fmt::Display) {
        self.errors.push(err.to_string());
    }

    pub fn last_error(&self) -> Option<&str> {
        self.errors.last().map(String::as_str)
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

impl Payload for ErrorList {
    const MERGEABLE: bool = true;

    fn merge(mut self, other: Self) -> Result<Self, MergeError> {
        self.errors.extend(other.errors);
        Ok(self)
    }
}

/// Dynamically typed payload used by net definitions and the command line.
///
/// Integers and strings are written bare; counters as `{ counter = n }` and
/// error lists as `{ errors = [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ValueRepr", into = "ValueRepr")]
pub enum Value {
    Int(i64),
    Text(String),
    Counter(Counter),
    Errors(ErrorList),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ValueRepr {
    Int(i64),
    Text(String),
    Counter { counter: u64 },
    Errors(ErrorList),
}

impl From<ValueRepr> for Value {
    fn from(repr: ValueRepr) -> Self {
        match repr {
            ValueRepr::Int(value) => Value::Int(value),
            ValueRepr::Text(value) => Value::Text(value),
            ValueRepr::Counter { counter } => Value::Counter(Counter(counter)),
            ValueRepr::Errors(list) => Value::Errors(list),
        }
    }
}

impl From<Value> for ValueRepr {
    fn from(value: Value) -> Self {
        match value {
            Value::Int(value) => ValueRepr::Int(value),
            Value::Text(value) => ValueRepr::Text(value),
            Value::Counter(Counter(counter)) => ValueRepr::Counter { counter },
            Value::Errors(list) => ValueRepr::Errors(list),
        }
    }
}

impl Value {
    /// Integers are recognised, everything else stays text.
    pub fn parse_arg(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(value) => Value::Int(value),
            Err(_) => Value::Text(raw.to_string()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Text(_) => "text",
            Value::Counter(_) => "counter",
            Value::Errors(_) => "errors",
        }
    }

    pub fn as_int(&self) -> Result<i64, PayloadError> {
        match self {
            Value::Int(value) => Ok(*value),
            other => Err(PayloadError::WrongType {
                expected: "int",
                actual: other.kind().to_string(),
            }),
        }
    }

    pub fn as_text(&self) -> Result<&str, PayloadError> {
        match self {
            Value::Text(value) => Ok(value),
            other => Err(PayloadError::WrongType {
                expected: "text",
                actual: other.kind().to_string(),
            }),
        }
    }
}

impl Payload for Value {
    const MERGEABLE: bool = true;

    fn merge(self, other: Self) -> Result<Self, MergeError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(b)
                .map(Value::Int)
                .ok_or_else(|| MergeError::Overflow {
                    left: a.to_string(),
                    right: b.to_string(),
                }),
            (Value::Text(mut a), Value::Text(b)) => {
                a.push_str(&b);
                Ok(Value::Text(a))
            }
            (Value::Counter(a), Value::Counter(b)) => a.merge(b).map(Value::Counter),
            (Value::Errors(a), Value::Errors(b)) => a.merge(b).map(Value::Errors),
            (left, right) => Err(MergeError::Incompatible {
                left: left.kind().to_string(),
                right: right.kind().to_string(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Text(value) => f.write_str(value),
            Value::Counter(value) => write!(f, "{value}"),
            Value::Errors(list) => write!(f, "{:?}", list.errors()),
        }
    }
}

/// Reads a textual payload as an integer.
pub fn int_from_text(token: &Token<Value>) -> Result<i64, PayloadError> {
    let raw = token.payload().as_text()?;
    raw.parse::<i64>().map_err(|source| PayloadError::Parse {
        raw: raw.to_string(),
        source,
    })
}
