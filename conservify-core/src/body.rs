//! Response body decoding by content type and base64 flag.

use base64::Engine;
use serde_json::Value;

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// No body, or an empty one.
    Empty,
    Json(Value),
    /// Transport delivered base64; these are the decoded bytes.
    Bytes(Vec<u8>),
    Text(String),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Bytes(b) => Some(b),
            Body::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

/// Error decoding a response body.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid json body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decode `raw` per `content_type` and the transfer's base64 flag.
///
/// JSON wins over base64: a JSON content type is always parsed as text.
pub fn decode(content_type: Option<&str>, base64: bool, raw: Option<&str>) -> Result<Body, DecodeError> {
    let raw = match raw {
        Some(r) if !r.is_empty() => r,
        _ => return Ok(Body::Empty),
    };
    if content_type.is_some_and(|ct| ct.contains("application/json")) {
        return Ok(Body::Json(serde_json::from_str(raw)?));
    }
    if base64 {
        // Android wraps encoded output at 76 columns.
        let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
        return Ok(Body::Bytes(bytes));
    }
    Ok(Body::Text(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    #[test]
    fn json_with_charset() {
        let body = decode(Some("application/json; charset=utf-8"), false, Some(r#"{"a":1}"#)).unwrap();
        assert_eq!(body, Body::Json(json!({"a": 1})));
    }

    #[test]
    fn base64_without_content_type() {
        let body = decode(None, true, Some(&b64("ABC"))).unwrap();
        assert_eq!(body, Body::Bytes(b"ABC".to_vec()));
    }

    #[test]
    fn base64_with_line_breaks() {
        let encoded = b64(&"x".repeat(100));
        let wrapped = format!("{}\n{}", &encoded[..76], &encoded[76..]);
        let body = decode(Some("application/octet-stream"), true, Some(&wrapped)).unwrap();
        assert_eq!(body.as_bytes().unwrap().len(), 100);
    }

    #[test]
    fn json_takes_precedence_over_base64() {
        let body = decode(Some("application/json"), true, Some("[1,2]")).unwrap();
        assert_eq!(body, Body::Json(json!([1, 2])));
    }

    #[test]
    fn plain_text_passthrough() {
        let body = decode(Some("text/plain"), false, Some("hello")).unwrap();
        assert_eq!(body, Body::Text("hello".into()));
    }

    #[test]
    fn empty_and_absent() {
        assert!(decode(Some("application/json"), false, None).unwrap().is_empty());
        assert!(decode(None, true, Some("")).unwrap().is_empty());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            decode(Some("application/json"), false, Some("{nope")),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(matches!(
            decode(None, true, Some("***")),
            Err(DecodeError::Base64(_))
        ));
    }
}
