//! Worker capability registry
//!
//! Stores worker manifests and answers capability queries. Two reverse
//! indexes (lower-cased tool name and semantic tag to worker ids) are kept
//! in step with the manifest map on every register/unregister.
//!
//! Scoring is keyword/tag based. Swapping in embedding search later only
//! touches [`WorkerRegistry::search`].

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TrustConfig;
use crate::error::RegistrationError;
use crate::trust::{TrustPolicy, TrustTier, VerificationStatus};
use crate::worker::{
    WorkerAvailability, WorkerAvailabilityInfo, WorkerCapability, WorkerManifest,
    WorkerSearchResult,
};

/// Number of search results `match_intent` filters from
pub const MATCH_SEARCH_LIMIT: usize = 50;

/// Default `search` limit
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Checks a manifest's trust claims before it is indexed.
///
/// A cryptographic signature verifier implements this trait; the registry
/// and its callers do not change.
pub trait TrustVerifier: Send + Sync {
    fn verify(&self, manifest: &mut WorkerManifest) -> Result<(), RegistrationError>;
}

/// Accepts declared tiers as-is, recording that nothing was verified.
#[derive(Debug, Clone, Default)]
pub struct HonorSystemVerifier {
    allow_untrusted: bool,
    require_signatures: bool,
}

impl HonorSystemVerifier {
    pub fn new(config: &TrustConfig) -> Self {
        Self {
            allow_untrusted: config.allow_untrusted_workers,
            require_signatures: config.require_signatures_production,
        }
    }
}

impl TrustVerifier for HonorSystemVerifier {
    fn verify(&self, manifest: &mut WorkerManifest) -> Result<(), RegistrationError> {
        let declared = manifest.trust.declared_tier;

        if declared == TrustTier::Untrusted && !self.allow_untrusted {
            warn!(worker_id = %manifest.worker_id, "Untrusted worker registration blocked");
            return Err(RegistrationError::UntrustedRejected(manifest.worker_id.clone()));
        }

        if manifest.trust.verified_tier.is_none() {
            manifest.trust.verified_tier = Some(declared);
            manifest.trust.verification_status = VerificationStatus::Unknown;

            info!(
                worker_id = %manifest.worker_id,
                declared_tier = %declared,
                "Worker trust accepted on honor system"
            );
        }

        if self.require_signatures
            && declared >= TrustTier::Verified
            && !manifest.trust.has_signature()
        {
            warn!(
                worker_id = %manifest.worker_id,
                declared_tier = %declared,
                "Worker missing required signature, clamping to sandbox"
            );
            let clamped = manifest.trust.effective_tier().min(TrustTier::Sandbox);
            manifest.trust.verification_status = VerificationStatus::Fail;
            manifest.trust.verified_tier = Some(clamped);
        }

        Ok(())
    }
}

/// Optional filters applied by [`WorkerRegistry::match_intent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConstraints {
    /// Only workers whose availability is `ready`
    pub require_ready: bool,
    /// Upper bound on current load
    pub max_load: f64,
}

impl Default for MatchConstraints {
    fn default() -> Self {
        Self {
            require_ready: false,
            max_load: 1.0,
        }
    }
}

/// Registry statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_workers: usize,
    pub total_capabilities: usize,
    /// Effective trust tier histogram
    pub trust_tiers: BTreeMap<String, usize>,
    pub availability: BTreeMap<String, usize>,
    pub indexed_tool_count: usize,
    pub indexed_tag_count: usize,
}

#[derive(Default)]
struct RegistryState {
    workers: HashMap<String, WorkerManifest>,
    /// Lower-cased tool name -> worker ids
    tool_index: HashMap<String, HashSet<String>>,
    /// Lower-cased semantic tag -> worker ids
    tag_index: HashMap<String, HashSet<String>>,
}

impl RegistryState {
    fn add_to_indexes(&mut self, manifest: &WorkerManifest) {
        for cap in &manifest.capabilities {
            self.tool_index
                .entry(cap.tool_name.to_lowercase())
                .or_default()
                .insert(manifest.worker_id.clone());
            for tag in &cap.semantic_tags {
                self.tag_index
                    .entry(tag.to_lowercase())
                    .or_default()
                    .insert(manifest.worker_id.clone());
            }
        }
    }

    fn remove_from_indexes(&mut self, manifest: &WorkerManifest) {
        for cap in &manifest.capabilities {
            remove_entry(&mut self.tool_index, &cap.tool_name.to_lowercase(), &manifest.worker_id);
            for tag in &cap.semantic_tags {
                remove_entry(&mut self.tag_index, &tag.to_lowercase(), &manifest.worker_id);
            }
        }
    }
}

fn remove_entry(index: &mut HashMap<String, HashSet<String>>, key: &str, worker_id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(worker_id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// Live registry of workers and their capabilities.
///
/// Mutations (register, unregister, status updates) and their index
/// maintenance run under the write guard, so readers never see an index
/// half-rebuilt. Reads share the guard and never block each other.
pub struct WorkerRegistry {
    state: RwLock<RegistryState>,
    verifier: Box<dyn TrustVerifier>,
}

impl WorkerRegistry {
    /// Registry with the honor-system verifier configured from `trust`
    pub fn new(trust: &TrustConfig) -> Self {
        Self::with_verifier(Box::new(HonorSystemVerifier::new(trust)))
    }

    pub fn with_verifier(verifier: Box<dyn TrustVerifier>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            verifier,
        }
    }

    /// Register or replace a worker.
    ///
    /// `registered_at` is kept from the first registration; everything else
    /// is taken from the new manifest.
    pub fn register(
        &self,
        mut manifest: WorkerManifest,
    ) -> Result<WorkerManifest, RegistrationError> {
        validate_manifest(&manifest)?;

        let mut state = self.state.write();
        let now = Utc::now();
        let previous = state.workers.get(&manifest.worker_id).and_then(|m| m.registered_at);
        manifest.registered_at = Some(previous.unwrap_or(now));
        manifest.last_seen = Some(now);

        self.verifier.verify(&mut manifest)?;

        if let Some(old) = state.workers.remove(&manifest.worker_id) {
            state.remove_from_indexes(&old);
        }
        state.add_to_indexes(&manifest);
        state.workers.insert(manifest.worker_id.clone(), manifest.clone());
        drop(state);

        info!(
            worker_id = %manifest.worker_id,
            worker_name = %manifest.worker_name,
            capabilities = manifest.capabilities.len(),
            trust_tier = %manifest.effective_tier(),
            "Worker registered"
        );

        Ok(manifest)
    }

    /// Remove a worker and its index entries
    pub fn unregister(&self, worker_id: &str) -> bool {
        let mut state = self.state.write();
        let Some(manifest) = state.workers.remove(worker_id) else {
            return false;
        };
        state.remove_from_indexes(&manifest);
        drop(state);

        info!(worker_id = %worker_id, "Worker unregistered");
        true
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerManifest> {
        self.state.read().workers.get(worker_id).cloned()
    }

    /// Snapshot of all workers, ordered by worker id
    pub fn list_all(&self) -> Vec<WorkerManifest> {
        let mut workers: Vec<_> = self.state.read().workers.values().cloned().collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        workers
    }

    pub fn len(&self) -> usize {
        self.state.read().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().workers.is_empty()
    }

    /// Rank workers against a free-text query.
    ///
    /// Workers below `min_trust_tier`, offline workers and workers scoring
    /// zero are excluded. Equal scores are ordered by worker id.
    pub fn search(
        &self,
        query: &str,
        min_trust_tier: Option<TrustTier>,
        limit: usize,
    ) -> Vec<WorkerSearchResult> {
        let query_lower = query.trim().to_lowercase();
        if query_lower.is_empty() {
            return Vec::new();
        }
        let query_words: HashSet<&str> = query_lower.split_whitespace().collect();

        let state = self.state.read();
        let mut results = Vec::new();

        for manifest in state.workers.values() {
            if min_trust_tier.is_some_and(|min| manifest.effective_tier() < min) {
                continue;
            }
            if manifest.is_offline() {
                continue;
            }

            let mut score: f64 = 0.0;
            let mut matched_capabilities = Vec::new();

            for cap in &manifest.capabilities {
                let cap_score = capability_score(&query_lower, &query_words, cap);
                if cap_score > 0.0 {
                    score = score.max(cap_score);
                    matched_capabilities.push(cap.tool_name.clone());
                }
            }

            if manifest.worker_name.to_lowercase().contains(&query_lower) {
                score = score.max(0.5);
            }

            if score > 0.0 {
                results.push(WorkerSearchResult {
                    worker_id: manifest.worker_id.clone(),
                    worker_name: manifest.worker_name.clone(),
                    relevance_score: score.min(1.0),
                    matched_capabilities,
                    trust: manifest.trust.clone(),
                    availability: manifest.availability.clone(),
                });
            }
        }
        drop(state);

        results.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        });
        results.truncate(limit);

        debug!(query = %query_lower, results = results.len(), "Worker search");
        results
    }

    /// Search filtered by trust policy and constraints
    pub fn match_intent(
        &self,
        intent: &str,
        constraints: Option<&MatchConstraints>,
        trust_policy: Option<&TrustPolicy>,
    ) -> Vec<WorkerSearchResult> {
        let min_tier = trust_policy.map(|p| p.minimum_worker_tier);
        let results = self.search(intent, min_tier, MATCH_SEARCH_LIMIT);
        let constraints = constraints.cloned().unwrap_or_default();
        let require_signatures = trust_policy.is_some_and(|p| p.require_signatures);

        let state = self.state.read();
        results
            .into_iter()
            .filter(|result| {
                let Some(manifest) = state.workers.get(&result.worker_id) else {
                    return false;
                };
                if constraints.require_ready
                    && manifest.availability.status != WorkerAvailability::Ready
                {
                    return false;
                }
                if manifest.availability.current_load > constraints.max_load {
                    return false;
                }
                !(require_signatures && !manifest.trust.has_signature())
            })
            .collect()
    }

    /// Best worker exposing `tool_name`.
    ///
    /// Ready workers first, then higher trust tier, then lower load.
    pub fn get_worker_for_tool(
        &self,
        tool_name: &str,
        trust_policy: Option<&TrustPolicy>,
    ) -> Option<WorkerManifest> {
        let state = self.state.read();
        let ids = state.tool_index.get(&tool_name.to_lowercase())?;

        let mut candidates: Vec<&WorkerManifest> = ids
            .iter()
            .filter_map(|id| state.workers.get(id))
            .filter(|m| trust_policy.map_or(true, |p| p.admits(&m.trust)))
            .filter(|m| !m.is_offline())
            .collect();

        candidates.sort_by(|a, b| {
            availability_rank(a)
                .cmp(&availability_rank(b))
                .then_with(|| Reverse(a.effective_tier()).cmp(&Reverse(b.effective_tier())))
                .then_with(|| a.availability.current_load.total_cmp(&b.availability.current_load))
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        });

        candidates.first().map(|m| (*m).clone())
    }

    /// Workers exposing a capability tagged `tag`, ordered by worker id
    pub fn find_by_tag(&self, tag: &str) -> Vec<WorkerManifest> {
        let state = self.state.read();
        let mut workers: Vec<_> = state
            .tag_index
            .get(&tag.to_lowercase())
            .into_iter()
            .flatten()
            .filter_map(|id| state.workers.get(id).cloned())
            .collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        workers
    }

    /// Replace a worker's availability and bump `last_seen`
    pub fn update_worker_status(
        &self,
        worker_id: &str,
        mut availability: WorkerAvailabilityInfo,
    ) -> bool {
        if !(0.0..=1.0).contains(&availability.current_load) {
            warn!(
                worker_id = %worker_id,
                current_load = availability.current_load,
                "Worker load outside [0, 1], clamping"
            );
            availability.current_load = if availability.current_load.is_nan() {
                1.0
            } else {
                availability.current_load.clamp(0.0, 1.0)
            };
        }

        let mut state = self.state.write();
        let Some(manifest) = state.workers.get_mut(worker_id) else {
            return false;
        };
        debug!(worker_id = %worker_id, status = %availability.status, "Worker status updated");
        manifest.availability = availability;
        manifest.last_seen = Some(Utc::now());
        true
    }

    pub fn get_stats(&self) -> RegistryStats {
        let state = self.state.read();
        let mut trust_tiers = BTreeMap::new();
        let mut availability = BTreeMap::new();

        for manifest in state.workers.values() {
            *trust_tiers.entry(manifest.effective_tier().to_string()).or_insert(0) += 1;
            *availability.entry(manifest.availability.status.to_string()).or_insert(0) += 1;
        }

        RegistryStats {
            total_workers: state.workers.len(),
            total_capabilities: state.workers.values().map(|m| m.capabilities.len()).sum(),
            trust_tiers,
            availability,
            indexed_tool_count: state.tool_index.len(),
            indexed_tag_count: state.tag_index.len(),
        }
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(&TrustConfig::default())
    }
}

fn availability_rank(manifest: &WorkerManifest) -> u8 {
    if manifest.availability.status == WorkerAvailability::Ready {
        0
    } else {
        1
    }
}

fn capability_score(
    query: &str,
    query_words: &HashSet<&str>,
    capability: &WorkerCapability,
) -> f64 {
    let tool = capability.tool_name.to_lowercase();
    let description = capability.description.to_lowercase();

    let mut score: f64 = if query == tool {
        1.0
    } else if tool.contains(query) {
        0.8
    } else if description.contains(query) {
        0.6
    } else {
        0.0
    };

    let tag_matches = capability
        .semantic_tags
        .iter()
        .map(|tag| tag.to_lowercase())
        .filter(|tag| query_words.iter().any(|word| tag.contains(word)))
        .count();
    if tag_matches > 0 {
        score = score.max(0.4 + 0.1 * tag_matches.min(4) as f64);
    }

    let description_words: HashSet<&str> = description.split_whitespace().collect();
    let overlap = description_words.iter().filter(|w| query_words.contains(*w)).count();
    if overlap > 0 {
        score = score.max(0.3 + 0.1 * overlap.min(3) as f64);
    }

    score
}

fn validate_manifest(manifest: &WorkerManifest) -> Result<(), RegistrationError> {
    let invalid = |reason: &str| RegistrationError::InvalidManifest {
        worker_id: manifest.worker_id.clone(),
        reason: reason.to_string(),
    };

    if manifest.worker_id.trim().is_empty() {
        return Err(invalid("worker_id must not be empty"));
    }
    if !(0.0..=1.0).contains(&manifest.availability.current_load) {
        return Err(invalid("current_load must be within [0, 1]"));
    }
    if manifest.availability.max_concurrent == 0 {
        return Err(invalid("max_concurrent must be at least 1"));
    }
    if manifest.capabilities.iter().any(|c| c.tool_name.trim().is_empty()) {
        return Err(invalid("capability tool_name must not be empty"));
    }
    Ok(())
}

/// Shared handle to a registry
#[derive(Clone)]
pub struct RegistryHandle {
    inner: Arc<WorkerRegistry>,
}

impl RegistryHandle {
    pub fn new(registry: WorkerRegistry) -> Self {
        Self {
            inner: Arc::new(registry),
        }
    }

    pub fn inner(&self) -> &WorkerRegistry {
        &self.inner
    }
}

impl std::ops::Deref for RegistryHandle {
    type Target = WorkerRegistry;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Default for RegistryHandle {
    fn default() -> Self {
        Self::new(WorkerRegistry::default())
    }
}
