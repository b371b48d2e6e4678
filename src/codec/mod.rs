mod value;

pub use value::{Payload, Value};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported value kind: {0}")]
    UnsupportedValueKind(String),

    #[error("Envelope serialization failed: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// 通过文本载荷携带结构化值的标签封装
///
/// 线上格式为 `{"_t": "<tag>", "_v": <payload>}`，不允许其他键。
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_t", content = "_v", rename_all = "lowercase", deny_unknown_fields)]
enum Envelope {
    Uuid(Uuid),
    Json(serde_json::Value),
}

/// 将应用值编码为DHT传输的标量
///
/// 原生标量原样传递，结构化类型用封装包裹。
pub fn encode(value: &Value) -> Result<Payload, CodecError> {
    let payload = match value {
        Value::Bool(b) => Payload::Bool(*b),
        Value::Int(i) => Payload::Int(*i),
        Value::Float(f) => Payload::Float(*f),
        Value::Text(s) => Payload::Text(s.clone()),
        Value::Bytes(b) => Payload::Bytes(b.clone()),
        Value::Uuid(u) => Payload::Text(serde_json::to_string(&Envelope::Uuid(*u))?),
        Value::Json(serde_json::Value::Null) => {
            return Err(CodecError::UnsupportedValueKind("json null".to_string()));
        }
        Value::Json(doc) => Payload::Text(serde_json::to_string(&Envelope::Json(doc.clone()))?),
    };

    Ok(payload)
}

/// 将传输的标量解码为应用值
///
/// 不会失败：不是有效封装的文本按原样作为文本返回。
/// `Payload::Null` 解码为 `None`。
pub fn decode(raw: Payload) -> Option<Value> {
    match raw {
        Payload::Null => None,
        Payload::Bool(b) => Some(Value::Bool(b)),
        Payload::Int(i) => Some(Value::Int(i)),
        Payload::Float(f) => Some(Value::Float(f)),
        Payload::Bytes(b) => Some(Value::Bytes(b)),
        Payload::Text(text) => match serde_json::from_str::<Envelope>(&text) {
            Ok(Envelope::Uuid(u)) => Some(Value::Uuid(u)),
            Ok(Envelope::Json(doc)) => Some(Value::Json(doc)),
            Err(_) => Some(Value::Text(text)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uuid_envelope_shape() {
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        let payload = encode(&Value::Uuid(id)).unwrap();

        match payload {
            Payload::Text(text) => {
                let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(doc, json!({"_t": "uuid", "_v": "67e55044-10b1-426f-9247-bb680e5fe0c8"}));
            }
            other => panic!("Expected text payload, got {:?}", other),
        }
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(encode(&Value::Int(42)).unwrap(), Payload::Int(42));
        assert_eq!(encode(&Value::Bool(false)).unwrap(), Payload::Bool(false));
        assert_eq!(encode(&Value::Text("plain".into())).unwrap(), Payload::Text("plain".into()));
        assert_eq!(encode(&Value::Bytes(vec![1, 2])).unwrap(), Payload::Bytes(vec![1, 2]));
    }

    #[test]
    fn test_json_null_is_rejected() {
        let err = encode(&Value::Json(serde_json::Value::Null)).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedValueKind(_)));
    }

    #[test]
    fn test_decode_falls_back_to_text() {
        for raw in ["hello", "42", "{\"a\": 1}", "{\"_t\": \"mystery\", \"_v\": 1}", "{\"_t\": \"uuid\", \"_v\": \"nope\"}", "{"] {
            assert_eq!(decode(Payload::Text(raw.to_string())), Some(Value::Text(raw.to_string())));
        }
    }

    #[test]
    fn test_envelope_with_extra_keys_is_text() {
        let raw = r#"{"_t":"uuid","_v":"67e55044-10b1-426f-9247-bb680e5fe0c8","note":"x"}"#;
        let payload = encode(&Value::Text(raw.to_string())).unwrap();
        assert_eq!(decode(payload), Some(Value::Text(raw.to_string())));

        for raw in [r#"{"_t":"json","_v":[1],"_x":0}"#, r#"{"note":"x","_t":"uuid","_v":"67e55044-10b1-426f-9247-bb680e5fe0c8"}"#] {
            assert_eq!(decode(Payload::Text(raw.to_string())), Some(Value::Text(raw.to_string())));
        }
    }

    #[test]
    fn test_decode_null_is_absent() {
        assert_eq!(decode(Payload::Null), None);
    }
}
