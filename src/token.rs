//! Token grammar: `[prefix ":"] base64url`, decoding to a JSON object.
//!
//! Errors here are never fatal to the caller — the extractor tries each
//! candidate token in turn until one decodes (see [`crate::extract`]) — but
//! they are typed so callers that do care (tests, diagnostics) can tell
//! truncation apart from a bad alphabet apart from non-UTF8 content.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum decoded token size (2 MB).
pub const MAX_DECODED_BYTES: usize = 2 * 1024 * 1024;

const PREFIXES: &[char] = &['c', 'j', 'p', 't'];

/// Failure modes for [`decode_token`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid base64url: {0}")]
    Base64(String),
    #[error("decoded token too large ({0} bytes)")]
    TooLarge(usize),
    #[error("decoded token is not valid utf-8")]
    Utf8,
    #[error("decoded token is not valid json: {0}")]
    Json(String),
    #[error("token must decode to a json object")]
    NotAnObject,
}

fn strip_known_prefix(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 3 && bytes[1] == b':' {
        let prefix = (bytes[0] as char).to_ascii_lowercase();
        if PREFIXES.contains(&prefix) {
            return &s[2..];
        }
    }
    s
}

fn pad_base64url(s: &str) -> String {
    let rem = s.len() % 4;
    if rem == 0 {
        s.to_string()
    } else {
        let mut out = String::with_capacity(s.len() + 4 - rem);
        out.push_str(s);
        for _ in 0..(4 - rem) {
            out.push('=');
        }
        out
    }
}

/// Decodes a token string to a JSON object.
///
/// Handles: raw JSON (`{...}`), optionally prefixed (`c:`/`j:`/`p:`/`t:`)
/// base64url, with or without padding, capped at [`MAX_DECODED_BYTES`]
/// decoded bytes.
pub fn decode_token(raw: &str) -> Result<Map<String, Value>, TokenError> {
    let s = raw.trim();

    if s.starts_with('{') && s.ends_with('}') {
        let v: Value = serde_json::from_str(s).map_err(|e| TokenError::Json(e.to_string()))?;
        return match v {
            Value::Object(m) => Ok(m),
            _ => Err(TokenError::NotAnObject),
        };
    }

    let stripped = strip_known_prefix(s).trim_end_matches('=');
    let padded = pad_base64url(stripped);
    let bytes = URL_SAFE
        .decode(padded.as_bytes())
        .map_err(|e| TokenError::Base64(e.to_string()))?;

    if bytes.len() > MAX_DECODED_BYTES {
        return Err(TokenError::TooLarge(bytes.len()));
    }

    let text = String::from_utf8(bytes).map_err(|_| TokenError::Utf8)?;
    let v: Value = serde_json::from_str(&text).map_err(|e| TokenError::Json(e.to_string()))?;
    match v {
        Value::Object(m) => Ok(m),
        _ => Err(TokenError::NotAnObject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    fn encode(obj: &Value) -> String {
        URL_SAFE_NO_PAD.encode(obj.to_string().as_bytes())
    }

    #[test]
    fn decodes_plain_base64url() {
        let obj = json!({"pulse": 5, "beat": 2, "stepIndex": 1});
        let tok = encode(&obj);
        let decoded = decode_token(&tok).unwrap();
        assert_eq!(decoded.get("pulse"), Some(&json!(5)));
    }

    #[test]
    fn decodes_with_known_prefix() {
        let obj = json!({"pulse": 1});
        let tok = format!("j:{}", encode(&obj));
        let decoded = decode_token(&tok).unwrap();
        assert_eq!(decoded.get("pulse"), Some(&json!(1)));
    }

    #[test]
    fn decodes_raw_json() {
        let decoded = decode_token(r#"{"pulse":3}"#).unwrap();
        assert_eq!(decoded.get("pulse"), Some(&json!(3)));
    }

    #[test]
    fn rejects_non_object_json() {
        let tok = encode(&json!([1, 2, 3]));
        assert_eq!(decode_token(&tok), Err(TokenError::NotAnObject));
    }

    #[test]
    fn rejects_oversized_payload() {
        let big = "a".repeat(MAX_DECODED_BYTES + 16);
        let obj = json!({"x": big});
        let tok = encode(&obj);
        assert!(matches!(decode_token(&tok), Err(TokenError::TooLarge(_))));
    }

    #[test]
    fn unpadded_and_padded_agree() {
        let obj = json!({"pulse": 7});
        let tok = encode(&obj);
        assert_eq!(decode_token(&tok).unwrap(), decode_token(&tok).unwrap());
    }
}
