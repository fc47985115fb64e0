//! Read-view types returned by the registry store: entry projections and
//! the full state snapshot. These are output-only — the payload stored in
//! the registry remains the single source of truth.

use crate::logical_time::LogicalTime;
use crate::merge::Registry;
use crate::payload::Payload;
use serde::Serialize;

/// The Kai-Klok spec tag embedded in every persisted/exported document.
pub const SPEC_TAG: &str = "KKS-1.0";

/// `latest` projection: componentwise logical moment across the registry.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct KaiMoment {
    pub pulse: i64,
    pub beat: i64,
    #[serde(rename = "stepIndex")]
    pub step_index: i64,
}

impl From<LogicalTime> for KaiMoment {
    fn from(t: LogicalTime) -> Self {
        KaiMoment {
            pulse: t.pulse,
            beat: t.beat,
            step_index: t.step_index,
        }
    }
}

/// One canonical registry entry: URL plus decoded payload, with computed
/// top-level convenience projections so callers don't need to reach into
/// `payload` for the common fields.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub url: String,
    pub payload: Payload,

    pub pulse: i64,
    pub beat: i64,
    #[serde(rename = "stepIndex")]
    pub step_index: i64,
    #[serde(rename = "chakraDay", skip_serializing_if = "Option::is_none")]
    pub chakra_day: Option<String>,
    #[serde(rename = "kaiSignature", skip_serializing_if = "Option::is_none")]
    pub kai_signature: Option<String>,
    #[serde(rename = "originUrl", skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    #[serde(rename = "parentUrl", skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<String>,
    #[serde(rename = "userPhiKey", skip_serializing_if = "Option::is_none")]
    pub user_phi_key: Option<String>,
    #[serde(rename = "phiKey", skip_serializing_if = "Option::is_none")]
    pub phi_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phikey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Entry {
    pub fn from_payload(url: String, payload: Payload) -> Entry {
        let t = crate::logical_time::from_payload(&payload);
        Entry {
            chakra_day: payload.chakra_day_str(),
            kai_signature: payload.kai_signature_str(),
            origin_url: payload.origin_url_str(),
            parent_url: payload.parent_url_str(),
            user_phi_key: payload.user_phi_key_str(),
            phi_key: payload.phi_key_str(),
            phikey: payload.phikey_str(),
            id: payload.id_str(),
            pulse: t.pulse,
            beat: t.beat,
            step_index: t.step_index,
            url,
            payload,
        }
    }
}

/// Full merged registry state snapshot, sorted logical-time descending.
#[derive(Debug, Clone, Serialize)]
pub struct State {
    pub spec: &'static str,
    pub total_urls: usize,
    pub latest: KaiMoment,
    pub state_seal: String,
    pub registry: Vec<Entry>,
    pub urls: Vec<String>,
}

/// Builds a [`State`] snapshot from an ordered URL list and the backing
/// registry map.
pub fn build_state(ordered_urls: &[String], registry: &Registry, seal: String) -> State {
    let mut entries = Vec::with_capacity(ordered_urls.len());
    let mut payloads = Vec::with_capacity(ordered_urls.len());
    for url in ordered_urls {
        if let Some(p) = registry.get(url) {
            payloads.push(p.clone());
            entries.push(Entry::from_payload(url.clone(), p.clone()));
        }
    }
    let latest = KaiMoment::from(crate::logical_time::latest(payloads.iter()));
    State {
        spec: SPEC_TAG,
        total_urls: entries.len(),
        latest,
        state_seal: seal,
        registry: entries,
        urls: ordered_urls.to_vec(),
    }
}
