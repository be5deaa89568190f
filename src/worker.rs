//! Worker manifests - the self-declared description of a worker

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trust::{TrustInfo, TrustTier};

/// Worker availability status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerAvailability {
    #[default]
    Ready,
    Degraded,
    Maintenance,
    Offline,
}

impl WorkerAvailability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Maintenance => "maintenance",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for WorkerAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current availability of a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerAvailabilityInfo {
    pub status: WorkerAvailability,
    /// Fraction of capacity in use, in [0, 1]
    pub current_load: f64,
    pub max_concurrent: u32,
}

impl Default for WorkerAvailabilityInfo {
    fn default() -> Self {
        Self {
            status: WorkerAvailability::Ready,
            current_load: 0.0,
            max_concurrent: 10,
        }
    }
}

impl WorkerAvailabilityInfo {
    pub fn new(status: WorkerAvailability, current_load: f64) -> Self {
        Self {
            status,
            current_load,
            ..Default::default()
        }
    }
}

/// Performance characteristics of a capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceHints {
    pub typical_latency_ms: u64,
    pub cost_units: u32,
    pub max_runtime_seconds: u32,
}

impl Default for PerformanceHints {
    fn default() -> Self {
        Self {
            typical_latency_ms: 1000,
            cost_units: 1,
            max_runtime_seconds: 60,
        }
    }
}

/// A named tool exposed by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCapability {
    pub tool_name: String,
    pub description: String,
    /// Tags used for capability matching
    #[serde(default)]
    pub semantic_tags: Vec<String>,
    #[serde(default = "empty_schema")]
    pub input_schema: Value,
    #[serde(default = "empty_schema")]
    pub output_schema: Value,
    #[serde(default)]
    pub performance_hints: PerformanceHints,
}

fn empty_schema() -> Value {
    Value::Object(Default::default())
}

impl WorkerCapability {
    pub fn new(tool_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            description: description.into(),
            semantic_tags: Vec::new(),
            input_schema: empty_schema(),
            output_schema: empty_schema(),
            performance_hints: PerformanceHints::default(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.semantic_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hints(mut self, hints: PerformanceHints) -> Self {
        self.performance_hints = hints;
        self
    }
}

/// Worker manifest, owned by the registry once registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerManifest {
    pub worker_id: String,
    pub worker_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub trust: TrustInfo,
    #[serde(default)]
    pub capabilities: Vec<WorkerCapability>,
    #[serde(default)]
    pub availability: WorkerAvailabilityInfo,
    /// Free-text limitations
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkerManifest {
    pub fn new(
        worker_id: impl Into<String>,
        worker_name: impl Into<String>,
        trust: TrustInfo,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            worker_name: worker_name.into(),
            version: default_version(),
            trust,
            capabilities: Vec::new(),
            availability: WorkerAvailabilityInfo::default(),
            constraints: Vec::new(),
            registered_at: None,
            last_seen: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_capability(mut self, capability: WorkerCapability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_availability(mut self, availability: WorkerAvailabilityInfo) -> Self {
        self.availability = availability;
        self
    }

    pub fn effective_tier(&self) -> TrustTier {
        self.trust.effective_tier()
    }

    pub fn is_offline(&self) -> bool {
        self.availability.status == WorkerAvailability::Offline
    }

    pub fn capability(&self, tool_name: &str) -> Option<&WorkerCapability> {
        self.capabilities
            .iter()
            .find(|c| c.tool_name.eq_ignore_ascii_case(tool_name))
    }
}

/// Per-query projection returned by search and match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSearchResult {
    pub worker_id: String,
    pub worker_name: String,
    /// Match strength in [0, 1]
    pub relevance_score: f64,
    pub matched_capabilities: Vec<String>,
    pub trust: TrustInfo,
    pub availability: WorkerAvailabilityInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_defaults_from_json() {
        let manifest: WorkerManifest = serde_json::from_value(serde_json::json!({
            "worker_id": "ocr-worker",
            "worker_name": "OCR Service",
            "trust": { "declared_tier": "verified" },
            "capabilities": [
                { "tool_name": "extract_text", "description": "Extract text" }
            ]
        }))
        .unwrap();

        assert_eq!(manifest.version, "1.0.0");
        assert_eq!(manifest.availability.status, WorkerAvailability::Ready);
        assert_eq!(manifest.availability.max_concurrent, 10);
        assert_eq!(manifest.capabilities[0].performance_hints.cost_units, 1);
        assert!(manifest.capabilities[0].input_schema.is_object());
        assert!(manifest.registered_at.is_none());
    }

    #[test]
    fn test_capability_lookup_ignores_case() {
        let manifest = WorkerManifest::new("w", "W", TrustInfo::declared(TrustTier::Sandbox))
            .with_capability(WorkerCapability::new("Extract_Text", "x"));
        assert!(manifest.capability("extract_text").is_some());
        assert!(manifest.capability("summarize").is_none());
    }

    #[test]
    fn test_offline() {
        let manifest = WorkerManifest::new("w", "W", TrustInfo::declared(TrustTier::Sandbox))
            .with_availability(WorkerAvailabilityInfo::new(WorkerAvailability::Offline, 0.0));
        assert!(manifest.is_offline());
    }
}
