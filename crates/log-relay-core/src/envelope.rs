//! Envelope normalization for incoming log lines.
//!
//! Every line is turned into a canonical JSON object before it is handed
//! to the transform service: lines that already are JSON objects pass
//! through as-is, everything else is wrapped in `{"message": <line>}`.

use bytes::Bytes;
use serde_json::{Map, Value};

/// Normalize a raw log line into canonical JSON envelope bytes.
///
/// Non-JSON input is the expected common case, not a failure; JSON arrays
/// and scalars are wrapped the same way as plain text.
#[must_use]
pub fn normalize(line: &str) -> Bytes {
    if let Ok(object) = serde_json::from_str::<Map<String, Value>>(line) {
        let bytes = serde_json::to_vec(&Value::Object(object))
            .expect("re-encoding parsed JSON cannot fail");
        return Bytes::from(bytes);
    }

    let wrapped = serde_json::json!({ "message": line });
    let bytes = serde_json::to_vec(&wrapped).expect("encoding a JSON string cannot fail");
    Bytes::from(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).expect("normalize must produce valid JSON")
    }

    #[test]
    fn test_plain_text_is_wrapped() {
        let envelope = normalize("connection timed out");
        assert_eq!(
            parse(&envelope),
            serde_json::json!({ "message": "connection timed out" })
        );
    }

    #[test]
    fn test_json_object_passes_through() {
        let line = r#"{"level":"warn","msg":"disk almost full","free_mb":512}"#;
        let envelope = normalize(line);

        let expected: Value = serde_json::from_str(line).unwrap();
        assert_eq!(parse(&envelope), expected);
    }

    #[test]
    fn test_json_array_is_wrapped() {
        let line = r#"[1, 2, 3]"#;
        let envelope = normalize(line);
        assert_eq!(parse(&envelope), serde_json::json!({ "message": line }));
    }

    #[test]
    fn test_json_scalar_is_wrapped() {
        let envelope = normalize("42");
        assert_eq!(parse(&envelope), serde_json::json!({ "message": "42" }));
    }

    #[test]
    fn test_almost_json_is_wrapped() {
        let line = r#"{"unterminated": "#;
        let envelope = normalize(line);
        assert_eq!(parse(&envelope), serde_json::json!({ "message": line }));
    }

    #[test]
    fn test_output_is_always_valid_json() {
        for line in ["", " ", "\t", "null", "true", r#""quoted""#, "{}", "plain"] {
            let envelope = normalize(line);
            parse(&envelope);
        }
    }

    #[test]
    fn test_nested_object_preserved() {
        let line = r#"{"outer":{"inner":[1,{"deep":true}]}}"#;
        let envelope = normalize(line);

        let expected: Value = serde_json::from_str(line).unwrap();
        assert_eq!(parse(&envelope), expected);
    }
}
