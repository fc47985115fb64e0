//! Deterministic JSON serialisation used anywhere byte-stability matters:
//! the content seal and the on-disk persisted registry snapshot.
//!
//! `serde_json::Value`'s `Object` variant is backed by a `BTreeMap` when the
//! `preserve_order` feature is off (the default, and the only configuration
//! this crate depends on), so `to_string` on a `Value` built from nested
//! maps already emits keys in sorted order with stable, compact separators.
//! This module exists to make that guarantee explicit and local to one
//! place rather than relying on an implicit crate-wide default elsewhere.

use serde::Serialize;
use serde_json::Value;

/// Serialises `value` to canonical JSON: sorted keys, compact separators,
/// UTF-8. Returns an empty object literal on serialisation failure, which
/// cannot happen for any value built from this crate's own types.
pub fn dumps_canonical<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(v) => canonical_string(&v),
        Err(_) => "{}".to_string(),
    }
}

fn canonical_string(v: &Value) -> String {
    // serde_json's default map representation (BTreeMap) already sorts
    // keys; `to_string` already uses compact, stable separators.
    v.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_and_uses_compact_separators() {
        let v = json!({"b": 1, "a": 2});
        assert_eq!(dumps_canonical(&v), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn stable_across_calls() {
        let v = json!({"urls": ["https://x/2", "https://x/1"]});
        let a = dumps_canonical(&v);
        let b = dumps_canonical(&v);
        assert_eq!(a, b);
    }
}
