//! The unit of wire transfer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// `{type, data}` as it travels between peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic string.
    #[serde(rename = "type")]
    pub kind: String,
    /// Positional payload.
    #[serde(default)]
    pub data: Vec<Value>,
}

impl Envelope {
    /// Creates an envelope.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Vec<Value>) -> Self {
        Self { kind: kind.into(), data }
    }

    /// Serializes to a JSON frame.
    ///
    /// # Errors
    ///
    /// Fails only if a payload value cannot be represented as JSON.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a JSON frame.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Json` if the bytes are not an envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_uses_type_and_data() {
        let env = Envelope::new("ping", vec![json!(12.5), json!("peer-a")]);
        let text = String::from_utf8(env.encode().unwrap()).unwrap();
        assert_eq!(text, r#"{"type":"ping","data":[12.5,"peer-a"]}"#);
    }

    #[test]
    fn test_missing_data_defaults_to_empty() {
        let env = Envelope::decode(br#"{"type":"pong"}"#).unwrap();
        assert_eq!(env.kind, "pong");
        assert!(env.data.is_empty());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            Envelope::decode(b"not json"),
            Err(ProtocolError::Json(_))
        ));
    }
}
