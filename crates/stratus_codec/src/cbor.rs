//! CBOR framing for binary push messages.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable value to CBOR bytes.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| CodecError::encoding(e.to_string()))?;
    Ok(buf)
}

/// Decodes CBOR bytes into a deserializable value.
///
/// Binary push frames are decoded into `serde_json::Value` so they share a
/// single decoding path with text frames.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    if bytes.is_empty() {
        return Err(CodecError::decoding("empty CBOR input"));
    }
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;
    use serde_json::json;

    #[test]
    fn json_document_through_cbor() {
        let doc = json!({"table": "posts", "seq": 4, "record": {"id": 1, "score": 2.5}});
        let bytes = to_cbor(&doc).unwrap();
        let decoded: serde_json::Value = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn value_through_cbor() {
        let value = Value::from(json!({"a": [1, "two", null]}));
        let bytes = to_cbor(&value).unwrap();
        let decoded: Value = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn rejects_garbage() {
        assert!(from_cbor::<serde_json::Value>(&[]).is_err());
        assert!(from_cbor::<serde_json::Value>(&[0xff, 0x00, 0x13]).is_err());
    }
}
