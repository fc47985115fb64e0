//! Loose, extensible krystal payload representation.
//!
//! A payload tolerates any shape of input JSON object: known topology and
//! identity fields are modelled explicitly, everything else is preserved
//! verbatim in an `extras` bag keyed by field name. Known fields are kept as
//! raw [`Value`] rather than native Rust integers/strings because the wire
//! format allows malformed or alternately-typed inputs (a `pulse` sent as a
//! string, for instance) that must survive ingestion and only get coerced
//! when logical time is actually derived.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single krystal artifact's fields.
///
/// Deliberately field-for-field with the wire JSON object: [`Serialize`]
/// flattens straight back out to the same shape a caller would recognise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulse: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beat: Option<Value>,
    #[serde(rename = "stepIndex", default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<Value>,
    #[serde(rename = "chakraDay", default, skip_serializing_if = "Option::is_none")]
    pub chakra_day: Option<Value>,
    #[serde(rename = "kaiSignature", default, skip_serializing_if = "Option::is_none")]
    pub kai_signature: Option<Value>,
    #[serde(rename = "originUrl", default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<Value>,
    #[serde(rename = "parentUrl", default, skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<Value>,
    #[serde(rename = "userPhiKey", default, skip_serializing_if = "Option::is_none")]
    pub user_phi_key: Option<Value>,
    #[serde(rename = "phiKey", default, skip_serializing_if = "Option::is_none")]
    pub phi_key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phikey: Option<Value>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

/// Short-key, snake_case, and synonym aliases normalised on ingress.
///
/// Mapping is additive: a canonical key already present in the object is
/// never overwritten, and the alias key itself is left untouched (it is
/// preserved verbatim as an extra field, matching upstream behaviour).
const ALIASES: &[(&str, &str)] = &[
    ("u", "pulse"),
    ("b", "beat"),
    ("s", "stepIndex"),
    ("c", "chakraDay"),
    ("step_index", "stepIndex"),
    ("chakra_day", "chakraDay"),
    ("kai_signature", "kaiSignature"),
    ("origin_url", "originUrl"),
    ("parent_url", "parentUrl"),
    ("step", "stepIndex"),
];

/// Applies alias normalisation to a raw JSON object in place.
pub fn normalize_aliases(obj: &mut Map<String, Value>) {
    for (alias, canonical) in ALIASES {
        if obj.contains_key(*canonical) {
            continue;
        }
        if let Some(v) = obj.get(*alias) {
            obj.insert((*canonical).to_string(), v.clone());
        }
    }
}

/// Builds a [`Payload`] from a raw decoded JSON object, applying alias
/// normalisation first. Returns `None` if the object cannot be represented
/// (this should not happen for any well-formed `Map`).
pub fn from_raw_object(mut obj: Map<String, Value>) -> Payload {
    normalize_aliases(&mut obj);
    serde_json::from_value(Value::Object(obj)).unwrap_or_default()
}

/// True for `null`, empty string (after trim), and empty array/object.
pub fn is_missing(v: Option<&Value>) -> bool {
    match v {
        None => true,
        Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

impl Payload {
    /// Flattens this payload to its full JSON object representation,
    /// including extras, suitable for richness scoring and merge filling.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(m)) => m,
            _ => Map::new(),
        }
    }

    /// Reconstructs a payload from a previously-flattened map. Does not
    /// re-run alias normalisation: that only ever happens once, on ingest.
    pub fn from_map(map: Map<String, Value>) -> Payload {
        serde_json::from_value(Value::Object(map)).unwrap_or_default()
    }

    fn str_field(v: &Option<Value>) -> Option<String> {
        match v {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// String projection of `chakraDay`, if present and non-empty.
    pub fn chakra_day_str(&self) -> Option<String> {
        Self::str_field(&self.chakra_day)
    }

    /// String projection of `kaiSignature`, if present and non-empty.
    pub fn kai_signature_str(&self) -> Option<String> {
        Self::str_field(&self.kai_signature)
    }

    /// String projection of `originUrl`, if present and non-empty.
    pub fn origin_url_str(&self) -> Option<String> {
        Self::str_field(&self.origin_url)
    }

    /// String projection of `parentUrl`, if present and non-empty.
    pub fn parent_url_str(&self) -> Option<String> {
        Self::str_field(&self.parent_url)
    }

    /// String projection of `userPhiKey`, if present and non-empty.
    pub fn user_phi_key_str(&self) -> Option<String> {
        Self::str_field(&self.user_phi_key)
    }

    /// String projection of `phiKey`, if present and non-empty.
    pub fn phi_key_str(&self) -> Option<String> {
        Self::str_field(&self.phi_key)
    }

    /// String projection of `phikey`, if present and non-empty.
    pub fn phikey_str(&self) -> Option<String> {
        Self::str_field(&self.phikey)
    }

    /// Best-effort identity projection: `userPhiKey` → `phikey` → `phiKey`.
    pub fn id_str(&self) -> Option<String> {
        self.user_phi_key_str()
            .or_else(|| self.phikey_str())
            .or_else(|| self.phi_key_str())
    }

    /// Sets `originUrl`, replacing any existing value (used when
    /// canonicalising an explicit topology field, never when soft-filling).
    pub fn set_origin_url(&mut self, url: String) {
        self.origin_url = Some(Value::String(url));
    }

    /// Sets `parentUrl`, replacing any existing value.
    pub fn set_parent_url(&mut self, url: String) {
        self.parent_url = Some(Value::String(url));
    }

    /// Fills `originUrl` only if currently missing.
    pub fn fill_origin_url(&mut self, url: &str) {
        if is_missing(self.origin_url.as_ref()) {
            self.origin_url = Some(Value::String(url.to_string()));
        }
    }

    /// Fills `parentUrl` only if currently missing.
    pub fn fill_parent_url(&mut self, url: &str) {
        if is_missing(self.parent_url.as_ref()) {
            self.parent_url = Some(Value::String(url.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn short_key_aliases_map_additively() {
        let p = from_raw_object(obj(json!({"u": 5, "b": 2, "s": 1, "c": "root"})));
        assert_eq!(p.pulse, Some(json!(5)));
        assert_eq!(p.beat, Some(json!(2)));
        assert_eq!(p.step_index, Some(json!(1)));
        assert_eq!(p.chakra_day, Some(json!("root")));
        // alias keys are preserved verbatim as extras
        assert_eq!(p.extras.get("u"), Some(&json!(5)));
    }

    #[test]
    fn alias_never_overwrites_canonical() {
        let p = from_raw_object(obj(json!({"pulse": 10, "u": 99})));
        assert_eq!(p.pulse, Some(json!(10)));
        assert_eq!(p.extras.get("u"), Some(&json!(99)));
    }

    #[test]
    fn snake_case_and_synonym_aliases() {
        let p = from_raw_object(obj(json!({
            "step_index": 3,
            "chakra_day": "solar",
            "kai_signature": "sig",
            "origin_url": "https://x/1",
            "parent_url": "https://x/2",
        })));
        assert_eq!(p.step_index, Some(json!(3)));
        assert_eq!(p.chakra_day_str().as_deref(), Some("solar"));
        assert_eq!(p.kai_signature_str().as_deref(), Some("sig"));
        assert_eq!(p.origin_url_str().as_deref(), Some("https://x/1"));
        assert_eq!(p.parent_url_str().as_deref(), Some("https://x/2"));
    }

    #[test]
    fn step_synonym() {
        let p = from_raw_object(obj(json!({"step": 7})));
        assert_eq!(p.step_index, Some(json!(7)));
    }

    #[test]
    fn extras_preserved_and_round_trip() {
        let p = from_raw_object(obj(json!({"pulse": 1, "weird": {"nested": true}})));
        assert_eq!(p.extras.get("weird"), Some(&json!({"nested": true})));
        let m = p.to_map();
        let p2 = Payload::from_map(m);
        assert_eq!(p, p2);
    }

    #[test]
    fn missing_checks() {
        assert!(is_missing(None));
        assert!(is_missing(Some(&Value::Null)));
        assert!(is_missing(Some(&json!(""))));
        assert!(is_missing(Some(&json!("   "))));
        assert!(is_missing(Some(&json!([]))));
        assert!(is_missing(Some(&json!({}))));
        assert!(!is_missing(Some(&json!(0))));
        assert!(!is_missing(Some(&json!(false))));
        assert!(!is_missing(Some(&json!("x"))));
    }

    #[test]
    fn id_projection_priority() {
        let p = from_raw_object(obj(json!({"phiKey": "a", "phikey": "b"})));
        assert_eq!(p.id_str().as_deref(), Some("b"));
        let p = from_raw_object(obj(json!({"userPhiKey": "u", "phikey": "b"})));
        assert_eq!(p.id_str().as_deref(), Some("u"));
    }
}
