//! Service boundary
//!
//! Wires the registry, planner, plan store and receipt emitter together.
//! Everything a transport layer needs goes through [`DelegateService`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::config::DelegateConfig;
use crate::error::DelegateError;
use crate::plan::{Plan, PLAN_SCHEMA_VERSION};
use crate::planner::Planner;
use crate::receipts::{
    DeliverySettings, DeliveryStats, PlanFact, Receipt, ReceiptEmitter, ReceiptSink, ReceiptWorker,
};
use crate::registry::{MatchConstraints, RegistryHandle, RegistryStats, WorkerRegistry};
use crate::request::{PlanRequest, PlanResponse};
use crate::store::{PlanStore, StoredPlan};
use crate::trust::{TrustPolicy, TrustTier};
use crate::validator::{self, ValidationReport};
use crate::worker::{WorkerAvailabilityInfo, WorkerManifest, WorkerSearchResult};

/// Static description of a running instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub instance_id: String,
    pub plan_schema_version: String,
    pub registered_workers: usize,
    pub max_plan_steps: usize,
}

pub struct DelegateService {
    config: DelegateConfig,
    registry: RegistryHandle,
    planner: Planner,
    store: Arc<dyn PlanStore>,
    receipts: ReceiptEmitter,
}

impl DelegateService {
    pub fn new(
        config: DelegateConfig,
        registry: RegistryHandle,
        store: Arc<dyn PlanStore>,
        receipts: ReceiptEmitter,
    ) -> Self {
        let planner = Planner::new(registry.clone(), config.clone());
        Self {
            config,
            registry,
            planner,
            store,
            receipts,
        }
    }

    /// Build a service with a fresh registry and start its receipt worker.
    ///
    /// `config` is validated first. The worker stops once the service (and
    /// every emitter clone) is dropped; the handle yields its final
    /// delivery counters.
    pub fn spawn(
        config: DelegateConfig,
        store: Arc<dyn PlanStore>,
        sink: Arc<dyn ReceiptSink>,
    ) -> Result<(Self, JoinHandle<DeliveryStats>), DelegateError> {
        config.validate()?;

        let registry = RegistryHandle::new(WorkerRegistry::new(&config.trust));
        let (emitter, queue) = ReceiptEmitter::new();
        let worker = ReceiptWorker::new(sink, queue, DeliverySettings::from(&config.receipts));
        let handle = tokio::spawn(worker.run());

        info!(instance_id = %config.instance_id, "Delegate service started");
        Ok((Self::new(config, registry, store, emitter), handle))
    }

    pub fn config(&self) -> &DelegateConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    fn tenant<'a>(&'a self, tenant_id: Option<&'a str>) -> &'a str {
        tenant_id.unwrap_or(self.config.default_tenant_id.as_str())
    }

    // === Plans ===

    /// Synthesize a plan for `request`.
    ///
    /// Created plans are persisted; created and escalated outcomes emit a
    /// receipt. Neither side effect can change the returned response.
    #[instrument(skip(self, request))]
    pub async fn create_plan(
        &self,
        tenant_id: Option<&str>,
        request: &PlanRequest,
    ) -> PlanResponse {
        let tenant_id = self.tenant(tenant_id);

        let response = self.planner.create_plan(request);

        let fact = match &response {
            PlanResponse::PlanCreated { plan, .. } => {
                if let Err(e) = self.store.save(tenant_id, plan).await {
                    error!(plan_id = %plan.plan_id(), error = %e, "Failed to persist plan");
                }
                Some(PlanFact::created(plan))
            }
            PlanResponse::RequiresEscalation(escalation) => Some(PlanFact::escalated(escalation)),
            PlanResponse::PlanningFailed(_) => None,
        };

        if let Some(fact) = fact {
            if let Err(e) = self.receipts.emit(Receipt::new(tenant_id, fact)) {
                warn!(error = %e, "Receipt not emitted");
            }
        }

        response
    }

    pub async fn get_plan(
        &self,
        tenant_id: Option<&str>,
        plan_id: &str,
    ) -> Result<Option<Plan>, DelegateError> {
        let stored = self.store.get(self.tenant(tenant_id), plan_id).await?;
        Ok(stored.map(|s| s.plan))
    }

    /// Newest first
    pub async fn list_plans(
        &self,
        tenant_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredPlan>, DelegateError> {
        Ok(self.store.list(self.tenant(tenant_id), limit).await?)
    }

    /// Validate against the configured step ceiling
    pub fn validate_plan(&self, plan: &Plan) -> ValidationReport {
        validator::validate_plan(plan, self.config.planning.max_plan_steps)
    }

    pub fn validate_plan_value(&self, document: Value) -> ValidationReport {
        validator::validate_plan_value(document, self.config.planning.max_plan_steps)
    }

    pub fn validate_plan_json(&self, json: &str) -> ValidationReport {
        validator::validate_plan_json(json, self.config.planning.max_plan_steps)
    }

    // === Workers ===

    #[instrument(skip(self, manifest), fields(worker_id = %manifest.worker_id))]
    pub fn register_worker(
        &self,
        manifest: WorkerManifest,
    ) -> Result<WorkerManifest, DelegateError> {
        Ok(self.registry.register(manifest)?)
    }

    pub fn unregister_worker(&self, worker_id: &str) -> Result<(), DelegateError> {
        if self.registry.unregister(worker_id) {
            Ok(())
        } else {
            Err(DelegateError::WorkerNotFound(worker_id.to_string()))
        }
    }

    pub fn get_worker(&self, worker_id: &str) -> Result<WorkerManifest, DelegateError> {
        self.registry
            .get(worker_id)
            .ok_or_else(|| DelegateError::WorkerNotFound(worker_id.to_string()))
    }

    pub fn list_workers(&self) -> Vec<WorkerManifest> {
        self.registry.list_all()
    }

    pub fn search_workers(
        &self,
        query: &str,
        min_trust_tier: Option<TrustTier>,
        limit: usize,
    ) -> Vec<WorkerSearchResult> {
        self.registry.search(query, min_trust_tier, limit)
    }

    pub fn match_workers(
        &self,
        intent: &str,
        constraints: Option<&MatchConstraints>,
        trust_policy: Option<&TrustPolicy>,
    ) -> Vec<WorkerSearchResult> {
        self.registry.match_intent(intent, constraints, trust_policy)
    }

    pub fn update_worker_status(
        &self,
        worker_id: &str,
        availability: WorkerAvailabilityInfo,
    ) -> Result<(), DelegateError> {
        if self.registry.update_worker_status(worker_id, availability) {
            Ok(())
        } else {
            Err(DelegateError::WorkerNotFound(worker_id.to_string()))
        }
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.get_stats()
    }

    pub fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance_id: self.config.instance_id.clone(),
            plan_schema_version: PLAN_SCHEMA_VERSION.to_string(),
            registered_workers: self.registry.len(),
            max_plan_steps: self.config.planning.max_plan_steps,
        }
    }
}
