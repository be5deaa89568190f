//! Plan persistence
//!
//! The planner hands finished plans to a [`PlanStore`]; a failed save is
//! logged by the caller and never changes the planning response.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::plan::Plan;

/// Most plans returned by one `list` call
pub const MAX_LIST_LIMIT: usize = 100;

/// A plan as held by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPlan {
    pub tenant_id: String,
    pub stored_at: DateTime<Utc>,
    pub plan: Plan,
}

/// Storage for created plans, keyed by tenant and plan id
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn save(&self, tenant_id: &str, plan: &Plan) -> Result<(), StoreError>;

    async fn get(&self, tenant_id: &str, plan_id: &str) -> Result<Option<StoredPlan>, StoreError>;

    /// Newest first, at most `limit` (clamped to 1..=100)
    async fn list(&self, tenant_id: &str, limit: usize) -> Result<Vec<StoredPlan>, StoreError>;
}

struct StoredDocument {
    stored_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    document: Value,
}

/// Process-local store holding plans as JSON documents.
///
/// Documents are decoded on read, so every plan handed back has passed
/// construction checks again.
#[derive(Default)]
pub struct InMemoryPlanStore {
    documents: RwLock<HashMap<(String, String), StoredDocument>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

fn decode(tenant_id: &str, stored: &StoredDocument) -> Result<StoredPlan, StoreError> {
    Ok(StoredPlan {
        tenant_id: tenant_id.to_string(),
        stored_at: stored.stored_at,
        plan: serde_json::from_value(stored.document.clone())?,
    })
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn save(&self, tenant_id: &str, plan: &Plan) -> Result<(), StoreError> {
        let document = serde_json::to_value(plan)?;
        let stored = StoredDocument {
            stored_at: Utc::now(),
            created_at: plan.metadata().created_at,
            document,
        };
        self.documents
            .write()
            .insert((tenant_id.to_string(), plan.plan_id().to_string()), stored);
        Ok(())
    }

    async fn get(&self, tenant_id: &str, plan_id: &str) -> Result<Option<StoredPlan>, StoreError> {
        let documents = self.documents.read();
        documents
            .get(&(tenant_id.to_string(), plan_id.to_string()))
            .map(|stored| decode(tenant_id, stored))
            .transpose()
    }

    async fn list(&self, tenant_id: &str, limit: usize) -> Result<Vec<StoredPlan>, StoreError> {
        let documents = self.documents.read();
        let mut owned: Vec<&StoredDocument> = documents
            .iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .map(|(_, stored)| stored)
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        owned
            .into_iter()
            .take(limit.clamp(1, MAX_LIST_LIMIT))
            .map(|stored| decode(tenant_id, stored))
            .collect()
    }
}
