//! Registry store: the single-writer, multi-reader map plus its three
//! cache-coherent read views, optional pruning, and atomic persistence.

use crate::config::Config;
use crate::merge::{self, InhaleReport, Registry};
use crate::qlog;
use crate::view::{self, State};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// On-disk persistence envelope: `{"spec": "...", "registry": {url: payload}}`,
/// the same shape the service exposes under `GetUrls`/`GetState`'s sibling
/// fields rather than an internal-only array encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedRegistry {
    spec: String,
    registry: HashMap<String, serde_json::Map<String, serde_json::Value>>,
}

struct Inner {
    registry: Registry,
    cache_urls: Option<Vec<String>>,
    cache_seal: Option<String>,
    cache_state: Option<State>,
}

impl Inner {
    fn invalidate(&mut self) {
        self.cache_urls = None;
        self.cache_seal = None;
        self.cache_state = None;
    }

    fn ensure_urls(&mut self) -> &[String] {
        if self.cache_urls.is_none() {
            self.cache_urls = Some(merge::ordered(&self.registry));
        }
        self.cache_urls.as_deref().unwrap()
    }

    fn ensure_seal(&mut self) -> String {
        self.ensure_urls();
        if self.cache_seal.is_none() {
            let urls = self.cache_urls.clone().unwrap_or_default();
            let canonical = crate::canonical_json::dumps_canonical(&serde_json::json!({
                "urls": urls
            }));
            self.cache_seal = Some(seal_hex(canonical.as_bytes()));
        }
        self.cache_seal.clone().unwrap()
    }

    fn ensure_state(&mut self) -> State {
        self.ensure_urls();
        let seal = self.ensure_seal();
        if self.cache_state.is_none() {
            let urls = self.cache_urls.clone().unwrap_or_default();
            self.cache_state = Some(view::build_state(&urls, &self.registry, seal));
        }
        self.cache_state.clone().unwrap()
    }
}

use blake2::digest::{consts::U16, Digest};

type Blake2b128 = blake2::Blake2b<U16>;

fn seal_hex(canonical_json_bytes: &[u8]) -> String {
    let mut hasher = Blake2b128::new();
    hasher.update(canonical_json_bytes);
    hex::encode(hasher.finalize())
}

/// The registry store: a mutex-guarded map plus its caches, with optional
/// best-effort atomic persistence.
pub struct RegistryStore {
    inner: Mutex<Inner>,
    config: Config,
}

impl RegistryStore {
    /// Builds an empty store. Does not touch disk; call
    /// [`RegistryStore::load`] to populate from `config.state_path`.
    pub fn new(config: Config) -> RegistryStore {
        RegistryStore {
            inner: Mutex::new(Inner {
                registry: HashMap::new(),
                cache_urls: None,
                cache_seal: None,
                cache_state: None,
            }),
            config,
        }
    }

    /// Builds a store and attempts to load it from `config.state_path`
    /// (falling back to `.bak`, then to an empty registry).
    pub fn load(config: Config) -> RegistryStore {
        let store = RegistryStore::new(config);
        store.load_from_disk_best_effort();
        store
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Merges `files` into the registry, optionally prunes, invalidates
    /// caches, and attempts best-effort persistence.
    pub fn inhale(&self, files: &[(String, Vec<u8>)]) -> InhaleReport {
        let report = {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            let report = merge::inhale_files(&mut inner.registry, files, &self.config.base_origin);
            if self.config.registry_keep > 0 {
                let keep: std::collections::HashSet<String> = merge::ordered(&inner.registry)
                    .into_iter()
                    .take(self.config.registry_keep)
                    .collect();
                inner.registry.retain(|url, _| keep.contains(url));
            }
            inner.invalidate();
            report
        };
        qlog!(
            "REGISTRY",
            "INHALE",
            "total" => report.crystals_total,
            "imported" => report.crystals_imported,
            "failed" => report.crystals_failed,
            "registry_urls" => report.registry_urls,
        );
        self.save_to_disk_best_effort();
        report
    }

    /// Returns the cached ordered URL list, building it if missing.
    pub fn exhale_urls(&self) -> Vec<String> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.ensure_urls().to_vec()
    }

    /// Returns `(page, total)`: `offset` is clamped to `>= 0`, `limit` to
    /// `>= 1`.
    pub fn exhale_urls_page(&self, offset: usize, limit: usize) -> (Vec<String>, usize) {
        let limit = limit.max(1);
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let urls = inner.ensure_urls();
        let total = urls.len();
        let page = urls
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }

    /// Returns the cached seal, building it if missing.
    pub fn get_seal(&self) -> String {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.ensure_seal()
    }

    /// Returns a snapshot of the cached state, building it if missing.
    pub fn get_state(&self) -> State {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.ensure_state()
    }

    fn load_from_disk_best_effort(&self) {
        let path = match &self.config.state_path {
            Some(p) => p.clone(),
            None => return,
        };
        let registry = read_registry_file(&path)
            .or_else(|_| read_registry_file(&backup_path(&path)))
            .unwrap_or_default();
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.registry = registry;
        inner.invalidate();
        qlog!("REGISTRY", "LOAD", "path" => path.display(), "entries" => inner.registry.len());
    }

    fn save_to_disk_best_effort(&self) {
        let path = match &self.config.state_path {
            Some(p) => p.clone(),
            None => return,
        };
        let persisted = {
            let inner = self.inner.lock().expect("registry lock poisoned");
            PersistedRegistry {
                spec: view::SPEC_TAG.to_string(),
                registry: inner
                    .registry
                    .iter()
                    .map(|(url, payload)| (url.clone(), payload.to_map()))
                    .collect(),
            }
        };
        if let Err(err) = write_registry_file(&path, &persisted) {
            qlog!("REGISTRY", "PERSIST_FAILED", "path" => path.display(), "err" => err);
        }
    }
}

fn backup_path(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".bak");
    std::path::PathBuf::from(s)
}

fn read_registry_file(path: &Path) -> io::Result<Registry> {
    let text = std::fs::read_to_string(path)?;
    let persisted: PersistedRegistry = serde_json::from_str(&text)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut registry = Registry::new();
    for (url, payload) in persisted.registry {
        if let Ok(payload) = serde_json::from_value(serde_json::Value::Object(payload)) {
            registry.insert(url, payload);
        }
        // Malformed entries are silently dropped per the persistence contract.
    }
    Ok(registry)
}

fn write_registry_file(path: &Path, persisted: &PersistedRegistry) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
    }
    let tmp_path = {
        let mut s = path.as_os_str().to_os_string();
        s.push(".tmp");
        std::path::PathBuf::from(s)
    };
    let contents = crate::canonical_json::dumps_canonical(persisted);

    let file = std::fs::File::create(&tmp_path).map_err(|e| e.to_string())?;
    {
        use std::io::Write;
        let mut writer = std::io::BufWriter::new(&file);
        writer
            .write_all(contents.as_bytes())
            .map_err(|e| e.to_string())?;
        writer.flush().map_err(|e| e.to_string())?;
    }
    file.sync_all().map_err(|e| e.to_string())?;

    if path.exists() {
        let _ = std::fs::copy(path, backup_path(path));
    }
    std::fs::rename(&tmp_path, path).map_err(|e| e.to_string())?;
    Ok(())
}

static GLOBAL_STORE: OnceCell<Arc<RegistryStore>> = OnceCell::new();

/// Returns the process-wide store, built from the environment and loaded
/// from disk on first access. Binaries that want an explicit, testable
/// store should construct one with [`RegistryStore::load`] instead; this
/// accessor exists for callers (the `serve` subcommand, ad-hoc tooling)
/// that want a single shared instance without threading one through.
pub fn global_store() -> Arc<RegistryStore> {
    GLOBAL_STORE
        .get_or_init(|| Arc::new(RegistryStore::load(Config::from_env())))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn cfg() -> Config {
        let mut c = Config::default();
        c.base_origin = "https://k.example".to_string();
        c
    }

    fn token_for(obj: &serde_json::Value) -> String {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
        URL_SAFE_NO_PAD.encode(obj.to_string().as_bytes())
    }

    #[test]
    fn inhale_then_exhale_round_trip() {
        let store = RegistryStore::new(cfg());
        let tok = token_for(&serde_json::json!({"pulse": 5, "beat": 2, "stepIndex": 1}));
        let doc = serde_json::json!({"x": tok}).to_string();
        let report = store.inhale(&[("f.json".to_string(), doc.into_bytes())]);
        assert_eq!(report.crystals_imported, 1);
        assert_eq!(store.exhale_urls().len(), 1);
        assert_eq!(store.get_state().total_urls, 1);
        assert!(!store.get_seal().is_empty());
    }

    #[test]
    fn seal_changes_after_inhale_changes_registry() {
        let store = RegistryStore::new(cfg());
        let seal_before = store.get_seal();
        let tok = token_for(&serde_json::json!({"pulse": 1}));
        let doc = serde_json::json!({"x": tok}).to_string();
        store.inhale(&[("f.json".to_string(), doc.into_bytes())]);
        let seal_after = store.get_seal();
        assert_ne!(seal_before, seal_after);
    }

    #[test]
    fn persistence_round_trips_through_tmp_dir() {
        let dir = std::env::temp_dir().join(format!(
            "kai_registry_test_{:?}",
            std::thread::current().id()
        ));
        let path = dir.join("state.json");
        let mut c = cfg();
        c.state_path = Some(path.clone());
        let store = RegistryStore::new(c.clone());
        let tok = token_for(&serde_json::json!({"pulse": 3}));
        let doc = serde_json::json!({"x": tok}).to_string();
        store.inhale(&[("f.json".to_string(), doc.into_bytes())]);

        let reloaded = RegistryStore::load(c);
        assert_eq!(reloaded.exhale_urls().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn page_clamps_limit_to_at_least_one() {
        let store = RegistryStore::new(cfg());
        let (page, total) = store.exhale_urls_page(0, 0);
        assert!(page.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn global_store_is_a_stable_singleton() {
        let a = global_store();
        let b = global_store();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
