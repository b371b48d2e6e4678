use crate::codec::CodecError;
use crate::dht::Truthy;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use uuid::Uuid;

/// Scalar carried by the DHT for every key.
///
/// This is the only value shape the engine, its storage and its wire
/// protocol know about. Structured application values travel as
/// envelope text inside `Payload::Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Tombstone. Storing it deletes the key.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    /// Short name of the variant, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Null => "null",
            Payload::Bool(_) => "bool",
            Payload::Int(_) => "int",
            Payload::Float(_) => "float",
            Payload::Text(_) => "text",
            Payload::Bytes(_) => "bytes",
        }
    }
}

impl Truthy for Payload {
    fn is_truthy(&self) -> bool {
        match self {
            Payload::Null => false,
            Payload::Bool(b) => *b,
            Payload::Int(i) => *i != 0,
            Payload::Float(f) => *f != 0.0,
            Payload::Text(s) => !s.is_empty(),
            Payload::Bytes(b) => !b.is_empty(),
        }
    }
}

/// Application value kinds a node can store
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Identifier, serialized in its canonical hyphenated form
    Uuid(Uuid),
    /// Structured document (object, array or any non-null JSON value)
    Json(serde_json::Value),
}

impl Value {
    /// Short name of the kind, used in logs and the shell
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
        }
    }

    /// Whether the value passes through the codec untouched
    pub fn is_native(&self) -> bool {
        !matches!(self, Value::Uuid(_) | Value::Json(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Json(doc) => write!(f, "{}", doc),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = CodecError;

    /// Maps a parsed JSON literal onto the closest value kind.
    /// `null` has no kind: it would be indistinguishable from a delete.
    fn try_from(doc: serde_json::Value) -> Result<Self, Self::Error> {
        match doc {
            serde_json::Value::Null => Err(CodecError::UnsupportedValueKind("null".to_string())),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| CodecError::UnsupportedValueKind(format!("number {}", n))),
            },
            serde_json::Value::String(s) => Ok(Value::Text(s)),
            doc @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => Ok(Value::Json(doc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_truthiness() {
        assert!(!Payload::Null.is_truthy());
        assert!(!Payload::Bool(false).is_truthy());
        assert!(!Payload::Int(0).is_truthy());
        assert!(!Payload::Float(0.0).is_truthy());
        assert!(!Payload::Text(String::new()).is_truthy());
        assert!(!Payload::Bytes(Vec::new()).is_truthy());

        assert!(Payload::Bool(true).is_truthy());
        assert!(Payload::Int(-1).is_truthy());
        assert!(Payload::Float(f64::NAN).is_truthy());
        assert!(Payload::Text("0".to_string()).is_truthy());
        assert!(Payload::Bytes(vec![0]).is_truthy());
    }

    #[test]
    fn test_value_from_json_literal() {
        assert_eq!(Value::try_from(json!(42)).unwrap(), Value::Int(42));
        assert_eq!(Value::try_from(json!(1.5)).unwrap(), Value::Float(1.5));
        assert_eq!(Value::try_from(json!(true)).unwrap(), Value::Bool(true));
        assert_eq!(Value::try_from(json!("hi")).unwrap(), Value::Text("hi".to_string()));
        assert_eq!(
            Value::try_from(json!({"a": [1, 2]})).unwrap(),
            Value::Json(json!({"a": [1, 2]}))
        );

        let err = Value::try_from(json!(null)).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedValueKind(_)));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::Text("a b".to_string()).to_string(), "\"a b\"");
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "0xdead");
        assert_eq!(Value::Json(json!([1])).to_string(), "[1]");
    }
}
