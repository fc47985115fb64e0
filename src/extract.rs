//! Depth-first walk over arbitrary decoded JSON, surfacing every
//! `(canonical_url, payload)` hit discoverable via path, query, or fragment
//! tokens.

use crate::payload::{self, Payload};
use crate::token::decode_token;
use crate::url::{self, split};
use serde_json::Value;

/// One extracted payload, keyed by its canonical URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub canonical_url: String,
    pub payload: Payload,
}

fn looks_like_bare_token(s: &str) -> bool {
    s.len() >= 16
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn looks_like_url_candidate(s: &str) -> bool {
    looks_like_bare_token(s)
        || s.contains("/stream")
        || s.contains("/s/")
        || s.contains("/p~")
        || s.contains("http")
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(h) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(h);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).unwrap_or_else(|_| s.to_string())
}

/// Parses a `k=v&k2=v2` query or fragment string into ordered pairs,
/// preserving duplicate keys in source order.
pub fn parse_params(s: &str) -> Vec<(String, String)> {
    let s = s.strip_prefix('#').unwrap_or(s);
    if s.is_empty() {
        return Vec::new();
    }
    s.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            if v.is_empty() {
                return None;
            }
            Some((url_decode(k), url_decode(v)))
        })
        .collect()
}

fn params_value<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    params
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .collect()
}

/// Collects token candidates from a canonicalised URL's path, query, and
/// fragment, in priority order, de-duplicated after URL-decoding.
pub fn candidate_tokens(canonical_url: &str) -> Vec<String> {
    let u = split(canonical_url);
    let mut candidates: Vec<String> = Vec::new();

    if u.path.starts_with("/stream/c/") {
        return candidates;
    }

    if let Some(tok) = u.path.strip_prefix("/stream/p/") {
        if !tok.is_empty() && !tok.contains('/') {
            candidates.push(tok.to_string());
        }
    }
    if let Some(tok) = u.path.strip_prefix("/p~") {
        if !tok.is_empty() && !tok.contains('/') {
            candidates.push(tok.to_string());
        }
    }
    if let Some(tok) = u.path.strip_prefix("/stream/p~") {
        if !tok.is_empty() && !tok.contains('/') {
            candidates.push(tok.to_string());
        }
    }

    let query_params = parse_params(&u.query);
    for key in ["p", "t", "root", "token"] {
        for v in params_value(&query_params, key) {
            candidates.push(v.to_string());
        }
    }

    let fragment_params = parse_params(&u.fragment);
    for key in ["p", "t", "root", "token"] {
        for v in params_value(&fragment_params, key) {
            candidates.push(v.to_string());
        }
    }

    let mut out = Vec::with_capacity(candidates.len());
    let mut seen = std::collections::HashSet::new();
    for c in candidates {
        let decoded = url_decode(&c).trim().to_string();
        if decoded.is_empty() || !seen.insert(decoded.clone()) {
            continue;
        }
        out.push(decoded);
    }
    out
}

/// Attempts to extract a `(canonical_url, payload)` hit from a single URL
/// string. Returns `None` if the URL carries no decodable token.
pub fn extract_from_url(raw: &str, base_origin: &str) -> Option<Hit> {
    let canonical_url = url::canonicalize(raw, base_origin);
    if canonical_url.is_empty() {
        return None;
    }
    for token in candidate_tokens(&canonical_url) {
        if let Ok(obj) = decode_token(&token) {
            return Some(Hit {
                canonical_url: canonical_url.clone(),
                payload: payload::from_raw_object(obj),
            });
        }
    }
    None
}

/// Walks `value` depth-first, trying every string node that looks like a
/// plausible URL or bare token. Hits are returned in walk order; duplicates
/// by canonical URL are intentionally not de-duplicated here.
pub fn extract_all(value: &Value, base_origin: &str) -> Vec<Hit> {
    let mut hits = Vec::new();
    visit(value, base_origin, &mut hits);
    hits
}

fn visit(value: &Value, base_origin: &str, hits: &mut Vec<Hit>) {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && looks_like_url_candidate(s) {
                if let Some(hit) = extract_from_url(s, base_origin) {
                    hits.push(hit);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                visit(item, base_origin, hits);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                visit(v, base_origin, hits);
            }
        }
        _ => {}
    }
}
