//! Envelope codec: JSON text out, tolerant JSON decoding in.
//!
//! Decoding distinguishes two failure classes:
//! - `CodecError::Decode`: the payload is not well-formed JSON
//! - `CodecError::Validation`: it is JSON but not an object with string `Id` and `Type`
//!
//! Both are non-fatal; the dispatcher logs them and drops the message.

use crate::domain::envelope::Envelope;
use crate::domain::error::CodecError;

/// Serialize an envelope to wire text.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(CodecError::Encode)
}

/// Parse and validate a raw inbound payload.
pub fn decode(raw: &[u8]) -> Result<Envelope, CodecError> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;

    // Structs also deserialize from JSON arrays; only objects are envelopes.
    if !value.is_object() {
        return Err(CodecError::Validation(format!(
            "expected envelope object, got {}",
            json_kind(&value)
        )));
    }

    Ok(serde_json::from_value(value)?)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::correlation::EnvelopeId;
    use serde_json::json;

    #[test]
    fn test_decode_malformed_json() {
        let err = decode(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn test_decode_truncated_json() {
        let err = decode(br#"{"Id":"a","Type":"#).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn test_decode_missing_id() {
        let err = decode(br#"{"Type":"sub"}"#).unwrap_err();
        match err {
            CodecError::Validation(reason) => assert!(reason.contains("Id")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_type() {
        let err = decode(br#"{"Id":"sub:0:1"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Validation(_)));
    }

    #[test]
    fn test_decode_null_id_is_absent() {
        let err = decode(br#"{"Id":null,"Type":"pub"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Validation(_)));
    }

    #[test]
    fn test_decode_non_string_id() {
        let err = decode(br#"{"Id":7,"Type":"pub"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Validation(_)));
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        let cases: [&[u8]; 4] = [br#"["a","b",null]"#, b"42", br#""Id""#, b"null"];
        for raw in cases {
            let err = decode(raw).unwrap_err();
            assert!(
                matches!(err, CodecError::Validation(_)),
                "{:?} should fail validation",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_decode_empty_id_accepted() {
        let env = decode(br#"{"Id":"","Type":"mut","Msg":{"Id":"abc123"}}"#).unwrap();
        assert!(env.id.is_empty());
        assert_eq!(env.kind, "mut");
        assert_eq!(env.msg["Id"], "abc123");
    }

    #[test]
    fn test_decode_missing_msg_is_null() {
        let env = decode(br#"{"Id":"x","Type":"schema-set"}"#).unwrap();
        assert!(env.msg.is_null());
        assert!(env.error.is_none());
    }

    #[test]
    fn test_decode_remote_error_and_unknown_fields() {
        let env = decode(
            br#"{"Id":"inst:0:9","Type":"inst","Msg":null,"Error":"unknown schema, cannot instance","Extra":1}"#,
        )
        .unwrap();
        assert_eq!(
            env.error.as_deref(),
            Some("unknown schema, cannot instance")
        );
        assert!(env.is_error());
    }

    #[test]
    fn test_encode_keeps_nested_msg() {
        let msg = json!({
            "SchemaId": "test",
            "Schema": { "Fields": { "A": 1, "B": 1 } },
            "Tags": [1, [2, 3], { "deep": null }]
        });
        let env = Envelope::new(EnvelopeId::new("schema-set:0:1"), "schema-set", msg.clone());

        let text = encode(&env).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(reparsed["Msg"], msg);
        assert_eq!(reparsed["Id"], "schema-set:0:1");
        assert_eq!(reparsed["Type"], "schema-set");
    }
}
