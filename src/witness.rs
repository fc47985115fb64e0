//! Witness-chain ancestry: the `add=` URL parameter encodes an ordered list
//! of prior URLs/tokens, nearest ancestor last. This module derives the
//! resulting topology context and fills it into a leaf payload without ever
//! overwriting an explicit field.
//!
//! Open-question resolution (documented in `DESIGN.md`): only the leaf
//! inherits `originUrl` (from the chain root `u1`); intermediate chain nodes
//! inherit `parentUrl` from their predecessor only, and never `originUrl`.

use crate::extract::parse_params;
use crate::payload::Payload;
use crate::url::{self, split};

/// Derived topology context for a leaf URL carrying a witness chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WitnessContext {
    /// Canonicalised ancestor chain, root first, nearest ancestor last.
    pub chain: Vec<String>,
    /// `canonicalize(chain[0])`, set only when the chain is non-empty.
    pub origin_url: Option<String>,
    /// `canonicalize(chain.last())`, set only when the chain is non-empty.
    pub parent_url: Option<String>,
}

fn add_param(canonical_url: &str) -> Option<String> {
    let u = split(canonical_url);
    let query_params = parse_params(&u.query);
    let fragment_params = parse_params(&u.fragment);
    query_params
        .iter()
        .chain(fragment_params.iter())
        .find(|(k, _)| k == "add")
        .map(|(_, v)| v.clone())
}

/// Derives the witness context for a URL by reading its `add=` parameter
/// (query first, then fragment) and canonicalising every chain entry.
pub fn derive_witness_context(canonical_url: &str, base_origin: &str) -> WitnessContext {
    let raw = match add_param(canonical_url) {
        Some(v) if !v.trim().is_empty() => v,
        _ => return WitnessContext::default(),
    };

    let chain: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| url::canonicalize(s, base_origin))
        .filter(|s| !s.is_empty())
        .collect();

    if chain.is_empty() {
        return WitnessContext::default();
    }

    WitnessContext {
        origin_url: chain.first().cloned(),
        parent_url: chain.last().cloned(),
        chain,
    }
}

/// Fills only missing topology fields on `payload` from `ctx`. Explicit
/// fields already present on `payload` are never overwritten.
pub fn merge_derived_context(payload: &mut Payload, ctx: &WitnessContext) {
    if let Some(origin) = &ctx.origin_url {
        payload.fill_origin_url(origin);
    }
    if let Some(parent) = &ctx.parent_url {
        payload.fill_parent_url(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::from_raw_object;
    use serde_json::json;

    const BASE: &str = "https://k.example";

    #[test]
    fn empty_without_add_param() {
        let ctx = derive_witness_context("https://k.example/stream/p/LEAF", BASE);
        assert!(ctx.chain.is_empty());
        assert_eq!(ctx.origin_url, None);
        assert_eq!(ctx.parent_url, None);
    }

    #[test]
    fn single_link_chain_sets_both_origin_and_parent() {
        let leaf = "https://k.example/stream/p/LEAF?add=U1CANONICALTOKEN";
        let ctx = derive_witness_context(leaf, BASE);
        assert_eq!(ctx.chain.len(), 1);
        assert_eq!(ctx.origin_url, ctx.parent_url);
    }

    #[test]
    fn multi_link_chain_root_vs_nearest() {
        let leaf = "https://k.example/stream/p/LEAF?add=AAAAAAAAAAAAAAAA,BBBBBBBBBBBBBBBB";
        let ctx = derive_witness_context(leaf, BASE);
        assert_eq!(ctx.chain.len(), 2);
        assert_eq!(
            ctx.origin_url.as_deref(),
            Some("https://k.example/stream/p/AAAAAAAAAAAAAAAA")
        );
        assert_eq!(
            ctx.parent_url.as_deref(),
            Some("https://k.example/stream/p/BBBBBBBBBBBBBBBB")
        );
    }

    #[test]
    fn never_overwrites_explicit_fields() {
        let mut p = from_raw_object(
            json!({"originUrl": "https://explicit/origin"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let ctx = WitnessContext {
            chain: vec!["x".into()],
            origin_url: Some("https://derived/origin".into()),
            parent_url: Some("https://derived/parent".into()),
        };
        merge_derived_context(&mut p, &ctx);
        assert_eq!(p.origin_url_str().as_deref(), Some("https://explicit/origin"));
        assert_eq!(p.parent_url_str().as_deref(), Some("https://derived/parent"));
    }
}
