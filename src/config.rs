//! Centralises every environment variable this crate reads. Nothing outside
//! this module calls `std::env` directly, so tests can build a [`Config`]
//! value without mutating process environment.

use std::path::PathBuf;

const DEFAULT_BASE_ORIGIN: &str = "https://example.invalid";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Runtime configuration for the registry store and service adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base origin used to resolve relative URLs and bare tokens.
    pub base_origin: String,
    /// On-disk persistence path; persistence is disabled when `None`.
    pub state_path: Option<PathBuf>,
    /// Prune to the top-N newest entries after each inhale; `0` disables.
    pub registry_keep: usize,
    /// Ingress semaphore size bounding concurrent inhales.
    pub max_concurrent_inhales: usize,
    /// Streaming upload chunk size, in bytes.
    pub read_chunk_bytes: usize,
    /// Threshold above which an inhale response omits inline `state`.
    pub max_inline_state_urls: usize,
    /// Threshold above which an inhale response omits inline `urls`.
    pub max_inline_urls: usize,
    /// Bind address for `kaid serve`.
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_origin: DEFAULT_BASE_ORIGIN.to_string(),
            state_path: None,
            registry_keep: 0,
            max_concurrent_inhales: 32,
            read_chunk_bytes: 1_048_576,
            max_inline_state_urls: 10_000,
            max_inline_urls: 20_000,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

/// Parses an environment value as `usize`, falling back to `default` on any
/// missing or unparseable value rather than panicking.
fn safe_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn safe_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Builds a [`Config`] from the process environment, tolerating missing
    /// or malformed values by falling back to defaults.
    pub fn from_env() -> Config {
        let defaults = Config::default();
        Config {
            base_origin: safe_string("KAI_BASE_ORIGIN", &defaults.base_origin),
            state_path: std::env::var("KAI_STATE_PATH")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            registry_keep: safe_usize("KAI_REGISTRY_KEEP", defaults.registry_keep),
            max_concurrent_inhales: safe_usize(
                "KAI_MAX_CONCURRENT_INHALES",
                defaults.max_concurrent_inhales,
            ),
            read_chunk_bytes: safe_usize("KAI_READ_CHUNK_BYTES", defaults.read_chunk_bytes),
            max_inline_state_urls: safe_usize(
                "KAI_MAX_INLINE_STATE_URLS",
                defaults.max_inline_state_urls,
            ),
            max_inline_urls: safe_usize("KAI_MAX_INLINE_URLS", defaults.max_inline_urls),
            listen_addr: safe_string("KAI_LISTEN_ADDR", &defaults.listen_addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.base_origin, "https://example.invalid");
        assert_eq!(c.registry_keep, 0);
        assert_eq!(c.max_concurrent_inhales, 32);
        assert_eq!(c.read_chunk_bytes, 1_048_576);
        assert_eq!(c.max_inline_state_urls, 10_000);
        assert_eq!(c.max_inline_urls, 20_000);
        assert_eq!(c.listen_addr, "127.0.0.1:8080");
        assert_eq!(c.state_path, None);
    }

    #[test]
    fn safe_usize_falls_back_on_garbage() {
        std::env::set_var("KAI_TEST_GARBAGE_USIZE", "not-a-number");
        assert_eq!(safe_usize("KAI_TEST_GARBAGE_USIZE", 7), 7);
        std::env::remove_var("KAI_TEST_GARBAGE_USIZE");
    }
}
