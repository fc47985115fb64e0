//! URL canonicalisation: the sole source of registry keys.
//!
//! Hand-rolled rather than pulled in from a general-purpose URL crate: the
//! canonical form here is deliberately narrower than RFC 3986 full
//! normalisation (it must preserve path/query/fragment byte-for-byte except
//! for one targeted route rewrite) and matches this crate's existing
//! preference for small, purpose-built parsers (see the manual HTTP request
//! reader in the service adapter) over pulling in a heavyweight dependency
//! for a handful of string operations.

/// A URL split into its five canonical components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitUrl {
    pub scheme: String,
    pub netloc: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl SplitUrl {
    pub fn recompose(&self) -> String {
        let mut out = String::new();
        if !self.scheme.is_empty() {
            out.push_str(&self.scheme);
            out.push(':');
        }
        if !self.netloc.is_empty() {
            out.push_str("//");
            out.push_str(&self.netloc);
        }
        out.push_str(&self.path);
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(&self.query);
        }
        if !self.fragment.is_empty() {
            out.push('#');
            out.push_str(&self.fragment);
        }
        out
    }
}

/// Splits an absolute URL into `(scheme, netloc, path, query, fragment)`.
/// Assumes `url` already has a `scheme://` prefix (callers resolve relative
/// URLs against a base origin first via [`resolve_absolute`]).
pub fn split(url: &str) -> SplitUrl {
    let (before_fragment, fragment) = match url.split_once('#') {
        Some((a, b)) => (a, b),
        None => (url, ""),
    };
    let (before_query, query) = match before_fragment.split_once('?') {
        Some((a, b)) => (a, b),
        None => (before_fragment, ""),
    };

    let (scheme, rest) = match before_query.split_once("://") {
        Some((s, r)) => (s, r),
        None => ("", before_query),
    };

    let (netloc, path) = if scheme.is_empty() {
        ("", rest)
    } else {
        match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        }
    };

    SplitUrl {
        scheme: scheme.to_string(),
        netloc: netloc.to_string(),
        path: path.to_string(),
        query: query.to_string(),
        fragment: fragment.to_string(),
    }
}

/// Resolves `raw` against `base_origin`, producing an absolute URL string.
/// `base_origin` must itself be absolute (`scheme://host[:port]`).
pub fn resolve_absolute(raw: &str, base_origin: &str) -> String {
    if raw.contains("://") {
        return raw.to_string();
    }
    let base = base_origin.trim_end_matches('/');
    if raw.starts_with('/') {
        format!("{base}{raw}")
    } else {
        format!("{base}/{raw}")
    }
}

fn looks_like_bare_token(s: &str) -> bool {
    if s.len() < 16 {
        return false;
    }
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn percent_encode_token(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for b in token.bytes() {
        let is_unreserved = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~');
        if is_unreserved {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Rewrites `/p~<token>` or `/stream/p~<token>` paths to `/stream/p/<token>`,
/// percent-encoding the token. Returns `None` if the path does not match.
fn rewrite_tilde_route(path: &str) -> Option<String> {
    let tail = path
        .strip_prefix("/stream/p~")
        .or_else(|| path.strip_prefix("/p~"))?;
    if tail.is_empty() || tail.contains('/') {
        return None;
    }
    Some(format!("/stream/p/{}", percent_encode_token(tail)))
}

/// Produces the canonical absolute URL used as a registry key, or an empty
/// string for blank/unresolvable input.
///
/// Rules (applied in order): trim; bare-token rewrite to
/// `<base_origin>/stream/p/<token>`; resolve relative to `base_origin`;
/// lowercase scheme/netloc only; rewrite `/p~<token>` and
/// `/stream/p~<token>` to `/stream/p/<token>` preserving query/fragment.
pub fn canonicalize(raw: &str, base_origin: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let rewritten = if looks_like_bare_token(trimmed) {
        format!("/stream/p/{trimmed}")
    } else {
        trimmed.to_string()
    };

    let abs = resolve_absolute(&rewritten, base_origin);
    let mut u = split(&abs);
    u.scheme = u.scheme.to_lowercase();
    u.netloc = u.netloc.to_lowercase();

    if let Some(new_path) = rewrite_tilde_route(&u.path) {
        u.path = new_path;
    }

    u.recompose()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://k.example";

    #[test]
    fn trims_and_empties_blank_input() {
        assert_eq!(canonicalize("   ", BASE), "");
        assert_eq!(canonicalize("", BASE), "");
    }

    #[test]
    fn bare_token_rewrites_to_stream_p() {
        let got = canonicalize("ABCDEFGHIJKLMNOP", BASE);
        assert_eq!(got, "https://k.example/stream/p/ABCDEFGHIJKLMNOP");
    }

    #[test]
    fn relative_resolves_against_base() {
        let got = canonicalize("/stream/p/XYZ", BASE);
        assert_eq!(got, "https://k.example/stream/p/XYZ");
    }

    #[test]
    fn lowercases_scheme_and_host_only() {
        let got = canonicalize("HTTPS://K.Example/Stream/P/AbC?Q=1#F", BASE);
        assert_eq!(got, "https://k.example/Stream/P/AbC?Q=1#F");
    }

    #[test]
    fn tilde_route_rewrite_preserves_query_and_fragment() {
        let got = canonicalize("https://k.example/p~ABCDEFGHIJKLMNOP?p=QRSTUVWX", BASE);
        assert_eq!(
            got,
            "https://k.example/stream/p/ABCDEFGHIJKLMNOP?p=QRSTUVWX"
        );
    }

    #[test]
    fn stream_p_tilde_route_rewrite() {
        let got = canonicalize("https://k.example/stream/p~TOKEN123456789012", BASE);
        assert_eq!(got, "https://k.example/stream/p/TOKEN123456789012");
    }

    #[test]
    fn idempotent() {
        let once = canonicalize("https://k.example/p~ABCDEFGHIJKLMNOP?x=1", BASE);
        let twice = canonicalize(&once, BASE);
        assert_eq!(once, twice);
    }

    #[test]
    fn content_id_route_is_unchanged() {
        let got = canonicalize(
            "https://k.example/stream/c/0123456789abcdef",
            BASE,
        );
        assert_eq!(got, "https://k.example/stream/c/0123456789abcdef");
    }
}
