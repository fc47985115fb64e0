//! # kai_registry
//!
//! A deterministic merge gate for self-describing proof artifacts
//! ("krystals"). Each artifact carries a logical timestamp
//! `(pulse, beat, stepIndex)` and references to other artifacts embedded as
//! URLs or compact base64url tokens. This crate canonicalises those
//! references, extracts embedded payloads, resolves witness-chain ancestry,
//! and merges everything into a registry keyed by canonical URL — with no
//! dependence on wall-clock time for ordering or identity.
//!
//! ## Pipeline
//!
//! 1. [`logical_time`] — the `(pulse, beat, stepIndex)` total order.
//! 2. [`canonical_json`] — stable JSON serialisation for seal digests.
//! 3. [`token`] — base64url/raw-JSON token decoding.
//! 4. [`url`] — canonical URL form, the sole registry key.
//! 5. [`payload`] — the loose, alias-tolerant krystal record.
//! 6. [`extract`] — recursive payload discovery over arbitrary JSON.
//! 7. [`witness`] — witness-chain ancestry derivation.
//! 8. [`merge`] — conflict resolution, upsert, batch ingestion.
//! 9. [`registry`] — the cache-coherent, optionally-persisted store.
//!
//! [`config`] centralises environment configuration; [`service`] and the
//! `kaid` binary expose the store over HTTP and a small CLI.

pub mod canonical_json;
pub mod config;
pub mod extract;
pub mod log;
pub mod logical_time;
pub mod merge;
pub mod payload;
pub mod registry;
pub mod service;
pub mod token;
pub mod url;
pub mod view;
pub mod witness;

pub use config::Config;
pub use merge::{InhaleReport, Registry};
pub use payload::Payload;
pub use registry::RegistryStore;
pub use view::State;
