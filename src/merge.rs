//! The merge engine: conflict resolution, upsert semantics, witness-edge
//! synthesis, explicit-parent-chain stitching, and batch ingestion.

use crate::extract::{self, Hit};
use crate::logical_time::{self, LogicalTime};
use crate::payload::{is_missing, Payload};
use crate::url;
use crate::witness;
use serde_json::Value;
use std::collections::HashMap;

/// In-memory registry: canonical URL → payload. Insertion order is
/// immaterial; callers that need a deterministic order use [`ordered`].
pub type Registry = HashMap<String, Payload>;

/// Result of one `Inhale` call across a batch of files.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct InhaleReport {
    pub crystals_total: usize,
    pub crystals_imported: usize,
    pub crystals_failed: usize,
    pub registry_urls: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_pulse: Option<i64>,
    pub errors: Vec<String>,
}

const TOPOLOGY_IDENTITY_BONUS_FIELDS: &[&str] = &[
    "originUrl",
    "parentUrl",
    "kaiSignature",
    "userPhiKey",
    "phiKey",
    "phikey",
];
const TEMPORAL_BONUS_FIELDS: &[&str] = &["pulse", "beat", "stepIndex", "chakraDay"];

/// Computes the richness tie-break score: +1 per non-missing field
/// (including extras), plus bonus weight for topology/identity and
/// temporal-tag fields.
pub fn richness_score(p: &Payload) -> i64 {
    let map = p.to_map();
    let mut score: i64 = 0;
    for (key, value) in &map {
        if is_missing(Some(value)) {
            continue;
        }
        score += 1;
        if TOPOLOGY_IDENTITY_BONUS_FIELDS.contains(&key.as_str()) {
            score += 2;
        }
        if TEMPORAL_BONUS_FIELDS.contains(&key.as_str()) {
            score += 1;
        }
    }
    score
}

/// Resolves a conflict between a previously-stored payload and an incoming
/// one: strictly-greater logical time wins; equal time falls back to
/// richness; equal richness keeps `prev` (stability). Fields present on the
/// loser fill any field missing on the winner.
pub fn merge_payload(prev: &Payload, inc: &Payload) -> Payload {
    let prev_t = logical_time::from_payload(prev);
    let inc_t = logical_time::from_payload(inc);

    let (base, other) = match inc_t.cmp(&prev_t) {
        std::cmp::Ordering::Greater => (inc, prev),
        std::cmp::Ordering::Less => (prev, inc),
        std::cmp::Ordering::Equal => {
            if richness_score(inc) > richness_score(prev) {
                (inc, prev)
            } else {
                (prev, inc)
            }
        }
    };

    let mut base_map = base.to_map();
    let other_map = other.to_map();
    for (key, other_value) in other_map {
        let base_missing = is_missing(base_map.get(&key));
        if base_missing && !is_missing(Some(&other_value)) {
            base_map.insert(key, other_value);
        }
    }
    Payload::from_map(base_map)
}

/// Canonicalises any explicit `originUrl`/`parentUrl` already present on a
/// payload to stable absolute URL keys.
pub fn canonicalize_topology(payload: &mut Payload, base_origin: &str) {
    if let Some(origin) = payload.origin_url_str() {
        let canon = url::canonicalize(&origin, base_origin);
        if !canon.is_empty() && canon != origin {
            payload.set_origin_url(canon);
        }
    }
    if let Some(parent) = payload.parent_url_str() {
        let canon = url::canonicalize(&parent, base_origin);
        if !canon.is_empty() && canon != parent {
            payload.set_parent_url(canon);
        }
    }
}

/// Upserts `payload` at `url_key`. Returns `true` if the registry changed
/// (new key, or a structural change to the stored payload).
pub fn upsert(registry: &mut Registry, url_key: &str, payload: Payload) -> bool {
    match registry.get(url_key) {
        None => {
            registry.insert(url_key.to_string(), payload);
            true
        }
        Some(prev) => {
            let merged = merge_payload(prev, &payload);
            if *prev == merged {
                false
            } else {
                registry.insert(url_key.to_string(), merged);
                true
            }
        }
    }
}

/// Best-effort: ensures `url` is present in the registry by decoding its
/// embedded token. Returns `true` if a new entry was inserted.
fn ensure_url_in_registry(registry: &mut Registry, url_raw: &str, base_origin: &str) -> bool {
    let hit = match extract::extract_from_url(url_raw, base_origin) {
        Some(h) => h,
        None => return false,
    };
    if registry.contains_key(&hit.canonical_url) {
        return false;
    }
    registry.insert(hit.canonical_url, hit.payload);
    true
}

/// Synthesizes edges across a witness chain plus the leaf: ensures every
/// chain URL is present (decoding its token where possible) and soft-fills
/// `parentUrl` by chain position. Per the open-question resolution, only the
/// leaf receives `originUrl`; intermediate nodes only ever receive
/// `parentUrl` from their immediate predecessor.
pub fn synthesize_witness_edges(
    registry: &mut Registry,
    chain: &[String],
    leaf_url: &str,
    base_origin: &str,
) -> usize {
    let mut changes = 0;
    for url_raw in chain {
        if ensure_url_in_registry(registry, url_raw, base_origin) {
            changes += 1;
        }
    }

    let mut predecessor: Option<&str> = None;
    for url_key in chain.iter().map(String::as_str).chain(std::iter::once(leaf_url)) {
        if let Some(prev_url) = predecessor {
            if let Some(entry) = registry.get_mut(url_key) {
                let before = entry.clone();
                entry.fill_parent_url(prev_url);
                if *entry != before {
                    changes += 1;
                }
            }
        }
        predecessor = Some(url_key);
    }

    changes
}

/// Stitches the explicit `originUrl`/successive-`parentUrl` ancestry chain
/// starting from `start_url`, inserting any reachable, decodable ancestor
/// that is missing from the registry. Stops at `max_depth`, on a cycle
/// (an already-visited URL), or when a hop's token fails to decode.
pub fn stitch_explicit_parent_chain(
    registry: &mut Registry,
    start_url: &str,
    base_origin: &str,
    max_depth: usize,
) -> usize {
    let mut changes = 0;
    let mut visited = std::collections::HashSet::new();
    visited.insert(start_url.to_string());
    let mut cur = start_url.to_string();

    for _ in 0..max_depth {
        let payload = match registry.get(&cur) {
            Some(p) => p.clone(),
            None => break,
        };

        if let Some(origin) = payload.origin_url_str() {
            let canon = url::canonicalize(&origin, base_origin);
            if !canon.is_empty() && ensure_url_in_registry(registry, &canon, base_origin) {
                changes += 1;
            }
        }

        let parent = match payload.parent_url_str() {
            Some(p) => p,
            None => break,
        };
        let canon_parent = url::canonicalize(&parent, base_origin);
        if canon_parent.is_empty() || !visited.insert(canon_parent.clone()) {
            break;
        }
        if ensure_url_in_registry(registry, &canon_parent, base_origin) {
            changes += 1;
        }
        cur = canon_parent;
    }

    changes
}

/// Ingests a batch of `(name, bytes)` files into `registry`, mutating it in
/// place and returning a report. Deterministic: the final registry state
/// depends only on the multiset of input files, never on intra-batch order.
pub fn inhale_files(
    registry: &mut Registry,
    files: &[(String, Vec<u8>)],
    base_origin: &str,
) -> InhaleReport {
    let mut report = InhaleReport::default();

    for (name, bytes) in files {
        let text = match std::str::from_utf8(bytes) {
            Ok(t) => t,
            Err(e) => {
                report.crystals_failed += 1;
                report.errors.push(format!("{name}: not valid UTF-8 ({e})"));
                continue;
            }
        };
        let doc: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                report.crystals_failed += 1;
                report.errors.push(format!("{name}: invalid JSON ({e})"));
                continue;
            }
        };

        let hits = extract::extract_all(&doc, base_origin);
        report.crystals_total += hits.len();

        for Hit {
            canonical_url,
            payload,
        } in hits
        {
            let url_key = url::canonicalize(&canonical_url, base_origin);
            if url_key.is_empty() {
                continue;
            }

            let ctx = witness::derive_witness_context(&url_key, base_origin);
            let mut merged_leaf = payload;
            witness::merge_derived_context(&mut merged_leaf, &ctx);
            canonicalize_topology(&mut merged_leaf, base_origin);

            if upsert(registry, &url_key, merged_leaf) {
                report.crystals_imported += 1;
            }

            if !ctx.chain.is_empty() {
                synthesize_witness_edges(registry, &ctx.chain, &url_key, base_origin);
            }

            stitch_explicit_parent_chain(registry, &url_key, base_origin, 128);
        }
    }

    report.registry_urls = registry.len();
    let mut latest_pulse: Option<i64> = None;
    for p in registry.values() {
        if p.pulse.is_none() {
            continue;
        }
        let v = logical_time::coerce_int(p.pulse.as_ref());
        latest_pulse = Some(latest_pulse.map_or(v, |cur| cur.max(v)));
    }
    report.latest_pulse = latest_pulse;

    report
}

/// Returns registry URLs sorted by logical time descending, URL ascending
/// on ties.
pub fn ordered(registry: &Registry) -> Vec<String> {
    let mut items: Vec<(&String, LogicalTime)> = registry
        .iter()
        .map(|(u, p)| (u, logical_time::from_payload(p)))
        .collect();
    items.sort_by(|(u_a, t_a), (u_b, t_b)| t_b.cmp(t_a).then_with(|| u_a.cmp(u_b)));
    items.into_iter().map(|(u, _)| u.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::from_raw_object;
    use serde_json::json;

    fn payload_of(v: Value) -> Payload {
        from_raw_object(v.as_object().unwrap().clone())
    }

    #[test]
    fn newer_wins_s3() {
        let prev = payload_of(json!({"pulse": 1}));
        let inc = payload_of(json!({"pulse": 2, "kaiSignature": "sig"}));
        let merged = merge_payload(&prev, &inc);
        assert_eq!(merged.pulse, Some(json!(2)));
        assert_eq!(merged.kai_signature_str().as_deref(), Some("sig"));
    }

    #[test]
    fn tie_richer_wins_s4() {
        let a = payload_of(json!({"pulse": 3, "beat": 0, "stepIndex": 0}));
        let b = payload_of(json!({
            "pulse": 3, "beat": 0, "stepIndex": 0,
            "originUrl": "https://k.example/stream/p/AAA",
        }));
        let merged = merge_payload(&a, &b);
        assert_eq!(
            merged.origin_url_str().as_deref(),
            Some("https://k.example/stream/p/AAA")
        );
    }

    #[test]
    fn tie_equal_richness_keeps_prev_stable() {
        let prev = payload_of(json!({"pulse": 1, "chakraDay": "root"}));
        let inc = payload_of(json!({"pulse": 1, "chakraDay": "crown"}));
        let merged = merge_payload(&prev, &inc);
        assert_eq!(merged.chakra_day_str().as_deref(), Some("root"));
    }

    #[test]
    fn fills_missing_both_directions_s5() {
        let a = payload_of(json!({"pulse": 4, "kaiSignature": "s"}));
        let b = payload_of(json!({"pulse": 4, "chakraDay": "root"}));
        let merged = merge_payload(&a, &b);
        assert_eq!(merged.kai_signature_str().as_deref(), Some("s"));
        assert_eq!(merged.chakra_day_str().as_deref(), Some("root"));
    }

    #[test]
    fn merge_is_idempotent() {
        let p = payload_of(json!({"pulse": 1, "kaiSignature": "s"}));
        let merged = merge_payload(&p, &p);
        assert_eq!(merged, p);
    }

    #[test]
    fn upsert_changed_then_unchanged() {
        let mut reg = Registry::new();
        let p = payload_of(json!({"pulse": 1}));
        assert!(upsert(&mut reg, "https://k.example/x", p.clone()));
        assert!(!upsert(&mut reg, "https://k.example/x", p));
    }

    #[test]
    fn ordered_sorts_desc_then_url_asc() {
        let mut reg = Registry::new();
        reg.insert("https://b".into(), payload_of(json!({"pulse": 1})));
        reg.insert("https://a".into(), payload_of(json!({"pulse": 1})));
        reg.insert("https://z".into(), payload_of(json!({"pulse": 2})));
        let urls = ordered(&reg);
        assert_eq!(urls, vec!["https://z", "https://a", "https://b"]);
    }

    #[test]
    fn richness_weights_topology_and_identity() {
        let bare = payload_of(json!({"pulse": 1}));
        let rich = payload_of(json!({"pulse": 1, "originUrl": "https://x/1", "parentUrl": "https://x/2"}));
        assert!(richness_score(&rich) > richness_score(&bare));
    }
}
