//! Plan synthesis
//!
//! Turns an analyzed intent plus matched workers into one of three plan
//! shapes:
//!
//! ```text
//! simple   exec ──► wait                       (or one sync call)
//! medium   exec ──► wait ──► aggregate
//! complex  exec₁ ─┐
//!          exec₂ ─┼─► wait(all) ──► aggregate
//!          execₙ ─┘
//! ```
//!
//! The planner never executes anything. Every outcome is a validated
//! [`Plan`], an escalation, or (with escalation disabled) a failure.

use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::config::DelegateConfig;
use crate::error::{PlanError, RequestError};
use crate::intent::{split_into_subtasks, truncate_chars, Complexity, IntentAnalysis};
use crate::plan::{
    EscalationReason, Plan, PlanMetadata, PlanReference, PlanReferences, PlanStep, StepId, StepKind,
    WaitCondition,
};
use crate::registry::RegistryHandle;
use crate::request::{Escalation, PlanRequest, PlanResponse, PlanningFailure, PlanningMetadata};
use crate::trust::{TrustInfo, TrustPolicy};
use crate::validator::validate_plan;
use crate::worker::{WorkerAvailability, WorkerSearchResult};

const INTENT_SUMMARY_CHARS: usize = 200;
const LOG_INTENT_CHARS: usize = 100;

const QUEUE_TIMEOUT_SECS: u32 = 300;
const WAIT_TIMEOUT_SECS: u32 = 600;
const FAN_IN_WAIT_TIMEOUT_SECS: u32 = 900;
const COST_UNITS_PER_SUBTASK: u32 = 50;

/// Worker chosen for an execution step
struct Selection {
    worker_id: String,
    tool_name: String,
    trust: TrustInfo,
    cost_units: Option<u32>,
}

/// Soft-failure description, rendered as escalation or failure
struct Setback {
    reason: EscalationReason,
    message: String,
    suggested_actions: Vec<String>,
    context: Map<String, Value>,
    error_code: String,
    failure_message: String,
    suggestions: Vec<String>,
}

impl Setback {
    fn new(reason: EscalationReason, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            reason,
            failure_message: message.clone(),
            message,
            suggested_actions: Vec::new(),
            context: Map::new(),
            error_code: reason.error_code().to_string(),
            suggestions: Vec::new(),
        }
    }

    fn actions(mut self, actions: &[&str]) -> Self {
        self.suggested_actions = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    fn context(mut self, context: Value) -> Self {
        self.context = into_map(context);
        self
    }

    fn failure(
        mut self,
        error_code: &str,
        message: impl Into<String>,
        suggestions: &[&str],
    ) -> Self {
        self.error_code = error_code.to_string();
        self.failure_message = message.into();
        self.suggestions = suggestions.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Plan synthesizer bound to a registry
pub struct Planner {
    registry: RegistryHandle,
    config: DelegateConfig,
}

impl Planner {
    pub fn new(registry: RegistryHandle, config: DelegateConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn config(&self) -> &DelegateConfig {
        &self.config
    }

    /// Policy applied to a request
    pub fn effective_policy(&self, request: &PlanRequest) -> TrustPolicy {
        request
            .planning_options
            .trust_policy
            .clone()
            .unwrap_or_else(|| TrustPolicy::with_minimum(self.config.trust.default_trust_tier))
    }

    /// Step ceiling for a request
    pub fn step_limit(&self, request: &PlanRequest) -> usize {
        (request.planning_options.max_steps as usize).min(self.config.planning.max_plan_steps)
    }

    /// Create a plan for `request`.
    ///
    /// Never fails: invalid requests, missing workers and internal errors
    /// all come back as escalation or failure responses.
    #[instrument(skip(self, request), fields(intent_len = request.intent.content.len()))]
    pub fn create_plan(&self, request: &PlanRequest) -> PlanResponse {
        let start = Instant::now();

        if let Err(e) = request.validate() {
            warn!(error = %e, "Rejected planning request");
            return self.setback(request, invalid_request(&e));
        }

        let intent = request.intent.content.as_str();
        let policy = self.effective_policy(request);
        let analysis = IntentAnalysis::analyze(intent, request.context.len());

        info!(
            intent = %truncate_chars(intent, LOG_INTENT_CHARS),
            task_type = analysis.task_type,
            complexity = %analysis.complexity,
            scope = analysis.scope.as_str(),
            min_trust_tier = %policy.minimum_worker_tier,
            "Planning intent"
        );

        let workers = self.registry.match_intent(intent, None, Some(&policy));
        if workers.is_empty() {
            let setback = Setback::new(
                EscalationReason::NoCapableWorkers,
                format!("No workers available for task type: {}", analysis.task_type),
            )
            .actions(&[
                "Register a worker with matching capabilities",
                "Modify intent to match available workers",
                "Lower trust tier requirements",
            ])
            .context(json!({ "task_type": analysis.task_type, "intent": intent }))
            .failure(
                "NO_CAPABLE_WORKERS",
                format!("No workers available for: {}", truncate_chars(intent, LOG_INTENT_CHARS)),
                &["Register appropriate workers"],
            );
            return self.setback(request, setback);
        }

        let mut warnings: Vec<String> = workers
            .iter()
            .filter(|w| w.availability.status == WorkerAvailability::Degraded)
            .map(|w| format!("Worker {} has degraded availability", w.worker_id))
            .collect();

        let built = match analysis.complexity {
            Complexity::Simple => self.simple_plan(request, &analysis, &workers, &policy),
            Complexity::Medium => self.medium_plan(request, &analysis, &workers, &policy),
            Complexity::Complex => self.complex_plan(request, &analysis, &workers, &policy),
        };

        let plan = match built {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "Planning failed");
                let setback = Setback::new(EscalationReason::Other, format!("Planning failed: {e}"))
                    .actions(&["Retry with simpler intent", "Check system status"])
                    .context(json!({ "error": e.to_string() }))
                    .failure("PLANNING_ERROR", e.to_string(), &[]);
                return self.setback(request, setback);
            }
        };

        if let Some(step) = plan.escalation_step() {
            return self.setback(request, escalation_from_step(step));
        }

        let limit = self.step_limit(request);
        let report = validate_plan(&plan, limit);
        if !report.valid {
            let message = report.errors.join("; ");
            let setback = Setback::new(EscalationReason::ConstraintConflict, message.clone())
                .actions(&["Increase max_steps", "Split the intent into smaller requests"])
                .context(json!({ "steps": plan.len(), "max_steps": limit }))
                .failure("CONSTRAINT_CONFLICT", message, &["Increase max_steps"]);
            return self.setback(request, setback);
        }
        warnings.extend(report.warnings);

        let confidence = scaled_confidence(analysis.complexity, &workers);
        let planning_metadata = PlanningMetadata {
            workers_considered: workers.len(),
            planning_duration_ms: start.elapsed().as_millis() as u64,
            confidence,
            warnings,
        };

        info!(
            plan_id = %plan.plan_id(),
            steps = plan.len(),
            workers = workers.len(),
            confidence,
            "Plan created"
        );

        PlanResponse::PlanCreated {
            plan,
            planning_metadata,
        }
    }

    /// Pick the tool for a matched worker.
    ///
    /// A worker matched only by display name has no matched capabilities;
    /// its first advertised capability is used, and the task-type label
    /// only when the manifest has none.
    fn select(&self, result: &WorkerSearchResult, fallback_tool: &str) -> Selection {
        let manifest = self.registry.get(&result.worker_id);
        let tool_name = result
            .matched_capabilities
            .first()
            .cloned()
            .or_else(|| {
                manifest
                    .as_ref()
                    .and_then(|m| m.capabilities.first())
                    .map(|c| c.tool_name.clone())
            })
            .unwrap_or_else(|| fallback_tool.to_string());
        let cost_units = manifest
            .as_ref()
            .and_then(|m| m.capability(&tool_name))
            .map(|c| c.performance_hints.cost_units);
        let trust = manifest.map(|m| m.trust).unwrap_or_else(|| result.trust.clone());

        Selection {
            worker_id: result.worker_id.clone(),
            tool_name,
            trust,
            cost_units,
        }
    }

    fn metadata(
        &self,
        request: &PlanRequest,
        analysis: &IntentAnalysis,
        policy: &TrustPolicy,
    ) -> PlanMetadata {
        let mut metadata = PlanMetadata::new(
            truncate_chars(&request.intent.content, INTENT_SUMMARY_CHARS),
            policy.clone(),
        );
        metadata.delegate_id = self.config.instance_id.clone();
        metadata.scope = analysis.scope;
        metadata.confidence = analysis.complexity.base_confidence();
        metadata
    }

    fn simple_plan(
        &self,
        request: &PlanRequest,
        analysis: &IntentAnalysis,
        workers: &[WorkerSearchResult],
        policy: &TrustPolicy,
    ) -> Result<Plan, PlanError> {
        let best = workers.first().ok_or_else(no_workers)?;
        let selection = self.select(best, analysis.task_type);
        let parameters = into_map(json!({ "intent": request.intent.content }));

        let mut steps = Vec::new();
        if request.planning_options.prefer_sync {
            steps.push(
                PlanStep::call_worker(&selection.worker_id, &selection.tool_name, parameters)?
                    .with_priority(request.intent.urgency)
                    .with_trust(selection.trust.clone())
                    .bind_output("result"),
            );
        } else {
            let exec = PlanStep::queue_execution(
                &selection.worker_id,
                &selection.tool_name,
                parameters,
                QUEUE_TIMEOUT_SECS,
            )?
            .with_priority(request.intent.urgency)
            .with_trust(selection.trust.clone())
            .bind_output("result");
            let wait = wait_step(&[exec.step_id.clone()], WAIT_TIMEOUT_SECS)?;
            steps.push(exec);
            steps.push(wait);
        }

        let mut metadata = self.metadata(request, analysis, policy);
        metadata.estimated_cost_units = selection.cost_units;
        metadata.assumptions = vec![format!(
            "Worker {} can handle {}",
            selection.worker_id, analysis.task_type
        )];

        let references = build_references(request, &steps);
        Plan::new(metadata, steps, references)
    }

    fn medium_plan(
        &self,
        request: &PlanRequest,
        analysis: &IntentAnalysis,
        workers: &[WorkerSearchResult],
        policy: &TrustPolicy,
    ) -> Result<Plan, PlanError> {
        let best = workers.first().ok_or_else(no_workers)?;
        let selection = self.select(best, analysis.task_type);

        let exec = PlanStep::queue_execution(
            &selection.worker_id,
            &selection.tool_name,
            into_map(json!({ "intent": request.intent.content })),
            QUEUE_TIMEOUT_SECS,
        )?
        .with_priority(request.intent.urgency)
        .with_trust(selection.trust.clone())
        .bind_output("primary_result");
        let wait = wait_step(&[exec.step_id.clone()], WAIT_TIMEOUT_SECS)?;
        let aggregate = PlanStep::aggregate(
            vec![exec.step_id.output_ref()],
            "Summarize and validate the results",
        )?
        .after([wait.step_id.clone()])
        .bind_output("summary");
        let steps = vec![exec, wait, aggregate];

        let mut metadata = self.metadata(request, analysis, policy);
        metadata.estimated_cost_units = selection.cost_units;
        metadata.assumptions = vec![
            format!("Worker {} can handle {}", selection.worker_id, analysis.task_type),
            "Results can be aggregated into summary".to_string(),
        ];

        let references = build_references(request, &steps);
        Plan::new(metadata, steps, references)
    }

    /// Fan-out plan over the intent's subtasks.
    ///
    /// Each subtask is matched on its own; without a specific match it falls
    /// back to the best worker for the whole intent. When nothing resolves
    /// the plan is a single escalate step.
    fn complex_plan(
        &self,
        request: &PlanRequest,
        analysis: &IntentAnalysis,
        workers: &[WorkerSearchResult],
        policy: &TrustPolicy,
    ) -> Result<Plan, PlanError> {
        let subtasks = split_into_subtasks(&request.intent.content, analysis.task_type);
        let mut steps = Vec::new();

        for (i, subtask) in subtasks.iter().enumerate() {
            let matches = self.registry.match_intent(&subtask.description, None, Some(policy));
            let Some(worker) = matches.first().or_else(|| workers.first()) else {
                debug!(subtask = %subtask.description, "No worker for subtask, skipping");
                continue;
            };
            let selection = self.select(worker, subtask.task_type);

            steps.push(
                PlanStep::queue_execution(
                    &selection.worker_id,
                    &selection.tool_name,
                    subtask.params.clone(),
                    subtask.timeout_seconds,
                )?
                .with_priority(request.intent.urgency)
                .with_trust(selection.trust)
                .bind_output(format!("subtask_{i}_result")),
            );
        }

        let exec_ids: Vec<StepId> = steps.iter().map(|s| s.step_id.clone()).collect();
        if exec_ids.is_empty() {
            steps.push(
                PlanStep::escalate(
                    EscalationReason::NoCapableWorkers,
                    "Could not find workers for any subtask",
                )?
                .with_escalation_details(
                    into_map(json!({ "subtasks": subtasks })),
                    vec!["Register additional workers".to_string(), "Simplify request".to_string()],
                ),
            );
        } else {
            let wait = wait_step(&exec_ids, FAN_IN_WAIT_TIMEOUT_SECS)?.bind_output("all_results");
            let aggregate = PlanStep::aggregate(
                exec_ids.iter().map(StepId::output_ref).collect(),
                "Combine results from all subtasks into coherent output",
            )?
            .after([wait.step_id.clone()])
            .bind_output("final_result");
            steps.push(wait);
            steps.push(aggregate);
        }

        let mut metadata = self.metadata(request, analysis, policy);
        metadata.estimated_cost_units =
            Some(COST_UNITS_PER_SUBTASK.saturating_mul(subtasks.len() as u32));
        metadata.assumptions = vec![
            format!("Intent can be decomposed into {} subtasks", subtasks.len()),
            "Subtask results can be aggregated".to_string(),
        ];

        let references = build_references(request, &steps);
        Plan::new(metadata, steps, references)
    }

    fn setback(&self, request: &PlanRequest, setback: Setback) -> PlanResponse {
        if request.planning_options.allow_escalation {
            info!(reason = %setback.reason, message = %setback.message, "Planning escalated");
            PlanResponse::RequiresEscalation(Escalation {
                reason: setback.reason,
                message: setback.message,
                suggested_actions: setback.suggested_actions,
                context: setback.context,
            })
        } else {
            warn!(
                error_code = %setback.error_code,
                message = %setback.failure_message,
                "Planning failed"
            );
            PlanResponse::PlanningFailed(PlanningFailure {
                error_code: setback.error_code,
                message: setback.failure_message,
                suggestions: setback.suggestions,
            })
        }
    }
}

fn no_workers() -> PlanError {
    PlanError::InvalidStep {
        kind: "queue_execution",
        reason: "no worker selected".to_string(),
    }
}

fn invalid_request(error: &RequestError) -> Setback {
    match error {
        RequestError::EmptyIntent => {
            Setback::new(EscalationReason::AmbiguousIntent, error.to_string())
                .actions(&["Describe the work to be planned"])
                .failure(
                    "INVALID_REQUEST",
                    error.to_string(),
                    &["Provide non-empty intent content"],
                )
        }
        RequestError::MaxStepsOutOfRange(max_steps) => {
            Setback::new(EscalationReason::ConstraintConflict, error.to_string())
                .actions(&["Set max_steps between 1 and 100"])
                .context(json!({ "max_steps": max_steps }))
                .failure("INVALID_REQUEST", error.to_string(), &["Set max_steps between 1 and 100"])
        }
    }
}

fn escalation_from_step(step: &PlanStep) -> Setback {
    match &step.kind {
        StepKind::Escalate {
            reason,
            message,
            context,
            suggested_options,
        } => Setback {
            reason: *reason,
            message: message.clone(),
            suggested_actions: suggested_options.clone(),
            context: context.clone(),
            error_code: reason.error_code().to_string(),
            failure_message: message.clone(),
            suggestions: suggested_options.clone(),
        },
        other => Setback::new(EscalationReason::Other, format!("Unexpected {} step", other.name())),
    }
}

fn wait_step(upstream: &[StepId], timeout_seconds: u32) -> Result<PlanStep, PlanError> {
    let conditions = upstream.iter().map(WaitCondition::task_completion).collect();
    Ok(PlanStep::wait_for(conditions, timeout_seconds)?
        .after(upstream.iter().cloned())
        .bind_output("wait_result"))
}

/// Context inputs plus the outputs of the plan's final steps
fn build_references(request: &PlanRequest, steps: &[PlanStep]) -> PlanReferences {
    let mut input_sources: Vec<PlanReference> = request
        .context
        .prior_context_refs
        .iter()
        .map(|id| PlanReference::observation(*id))
        .collect();
    input_sources.extend(request.context.related_task_refs.iter().map(PlanReference::related_task));

    let expected_outputs = steps
        .iter()
        .filter(|s| !matches!(s.kind, StepKind::Escalate { .. }))
        .filter(|s| !steps.iter().any(|o| o.depends_on.contains(&s.step_id)))
        .map(|s| PlanReference::step_output(s.step_id.clone(), s.output_binding.clone()))
        .collect();

    PlanReferences {
        input_sources,
        expected_outputs,
    }
}

/// Base confidence for the class scaled by the best match, capped at 1.0
fn scaled_confidence(complexity: Complexity, workers: &[WorkerSearchResult]) -> f64 {
    let base = complexity.base_confidence();
    let scaled = workers
        .iter()
        .map(|w| w.relevance_score)
        .max_by(f64::total_cmp)
        .map_or(base, |best| base * (0.5 + 0.5 * best));
    scaled.min(1.0)
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Priority;
    use crate::registry::WorkerRegistry;
    use crate::request::{PlanContext, PlanningOptions};
    use crate::trust::TrustTier;
    use crate::worker::{PerformanceHints, WorkerAvailabilityInfo, WorkerCapability, WorkerManifest};

    fn ocr_worker() -> WorkerManifest {
        let trust = TrustInfo::declared(TrustTier::Verified);
        WorkerManifest::new("ocr-worker", "OCR Service", trust).with_capability(
            WorkerCapability::new("extract_text", "Extract text from documents")
                .with_tags(["ocr", "text", "extraction"])
                .with_hints(PerformanceHints {
                    cost_units: 4,
                    ..Default::default()
                }),
        )
    }

    fn analyst_worker() -> WorkerManifest {
        let trust = TrustInfo::declared(TrustTier::Verified);
        WorkerManifest::new("analyst", "Document Analyst", trust).with_capability(
            WorkerCapability::new("analyze_documents", "Analyze documents and create reports")
                .with_tags(["analysis", "documents", "report"]),
        )
    }

    fn planner_with(workers: Vec<WorkerManifest>) -> Planner {
        let registry = RegistryHandle::new(WorkerRegistry::default());
        for worker in workers {
            registry.register(worker).unwrap();
        }
        Planner::new(registry, DelegateConfig::default())
    }

    fn created(response: &PlanResponse) -> (&Plan, &PlanningMetadata) {
        match response {
            PlanResponse::PlanCreated {
                plan,
                planning_metadata,
            } => (plan, planning_metadata),
            other => panic!("expected plan_created, got {other:?}"),
        }
    }

    // === Scenario Tests ===

    #[test]
    fn test_extract_text_scenario() {
        let planner = planner_with(vec![ocr_worker()]);
        let response = planner.create_plan(&PlanRequest::new("extract text from invoice.pdf"));

        let (plan, meta) = created(&response);
        let first = &plan.steps()[0];
        assert_eq!(first.step_type(), "queue_execution");
        assert_eq!(first.worker_id(), Some("ocr-worker"));
        assert_eq!(first.tool_name(), Some("extract_text"));

        // medium shape: exec, wait, aggregate
        let kinds: Vec<_> = plan.steps().iter().map(PlanStep::step_type).collect();
        assert_eq!(kinds, vec!["queue_execution", "wait_for", "aggregate"]);
        assert_eq!(plan.metadata().confidence, 0.8);
        assert_eq!(plan.metadata().estimated_cost_units, Some(4));
        assert_eq!(plan.metadata().delegate_id, "delegate-1");

        assert_eq!(meta.workers_considered, 1);
        assert!((meta.confidence - 0.8 * (0.5 + 0.5 * 0.6)).abs() < 1e-9);
        // honor-system trust shows up as an advisory warning
        assert!(meta.warnings.iter().any(|w| w.contains("has no verification")));
    }

    #[test]
    fn test_name_only_match_uses_first_capability() {
        let trust = TrustInfo::declared(TrustTier::Verified);
        let generator = WorkerManifest::new("codegen", "Code Generator", trust).with_capability(
            WorkerCapability::new("emit_source", "Emits source files").with_tags(["emitter"]),
        );
        let planner = planner_with(vec![generator]);

        let matches = planner.registry().match_intent("code generator", None, None);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].matched_capabilities.is_empty());

        let response = planner.create_plan(&PlanRequest::new("code generator"));
        let (plan, _) = created(&response);
        assert_eq!(plan.steps()[0].worker_id(), Some("codegen"));
        assert_eq!(plan.steps()[0].tool_name(), Some("emit_source"));
    }

    #[test]
    fn test_empty_registry_escalates() {
        let planner = planner_with(vec![]);
        let response = planner.create_plan(&PlanRequest::new("process invoice"));

        let escalation = response.escalation().unwrap();
        assert_eq!(escalation.reason, EscalationReason::NoCapableWorkers);
        assert_eq!(escalation.message, "No workers available for task type: document.invoice");
        assert_eq!(escalation.suggested_actions.len(), 3);
        assert_eq!(escalation.context["intent"], "process invoice");
    }

    #[test]
    fn test_escalation_disabled_fails() {
        let planner = planner_with(vec![]);
        let request = PlanRequest::new("process invoice").without_escalation();
        let response = planner.create_plan(&request);

        let failure = response.failure().unwrap();
        assert_eq!(failure.error_code, "NO_CAPABLE_WORKERS");
        assert_eq!(failure.message, "No workers available for: process invoice");
        assert_eq!(response.status(), "planning_failed");
    }

    #[test]
    fn test_complex_scenario_has_aggregate() {
        let planner = planner_with(vec![analyst_worker()]);
        let request = PlanRequest::new("analyze all documents and create comprehensive report");
        let response = planner.create_plan(&request);

        let (plan, _) = created(&response);
        let kinds: Vec<_> = plan.steps().iter().map(PlanStep::step_type).collect();
        assert_eq!(kinds, vec!["queue_execution", "queue_execution", "wait_for", "aggregate"]);
        assert_eq!(plan.metadata().estimated_cost_units, Some(100));
        assert_eq!(plan.metadata().confidence, 0.7);

        let aggregate = &plan.steps()[3];
        assert!(matches!(&aggregate.kind, StepKind::Aggregate { inputs, .. } if inputs.len() == 2));
        let wait = &plan.steps()[2];
        assert_eq!(wait.depends_on.len(), 2);
        assert!(matches!(
            &wait.kind,
            StepKind::WaitFor { timeout_seconds: Some(900), wait_conditions }
                if wait_conditions.len() == 2
        ));
        assert_eq!(plan.references().expected_outputs.len(), 1);
    }

    #[test]
    fn test_complex_unmatched_subtask_falls_back() {
        let trust = TrustInfo::declared(TrustTier::Verified);
        let translator = WorkerManifest::new("translator", "Translation Service", trust)
            .with_capability(
                WorkerCapability::new("translate", "Translate brochures between languages")
                    .with_tags(["translate", "language"]),
            );
        let planner = planner_with(vec![ocr_worker(), translator]);
        let request = PlanRequest::new("extract text and translate brochure and zzqq");
        let policy = planner.effective_policy(&request);
        let overall = planner.registry().match_intent(&request.intent.content, None, Some(&policy));
        assert!(planner.registry().match_intent("zzqq", None, Some(&policy)).is_empty());

        let response = planner.create_plan(&request);
        let (plan, _) = created(&response);
        let kinds: Vec<_> = plan.steps().iter().map(PlanStep::step_type).collect();
        assert_eq!(
            kinds,
            vec!["queue_execution", "queue_execution", "queue_execution", "wait_for", "aggregate"]
        );
        assert_eq!(plan.steps()[0].worker_id(), Some("ocr-worker"));
        assert_eq!(plan.steps()[1].worker_id(), Some("translator"));

        // no worker matches "zzqq" on its own, so the best whole-intent match takes it
        let fallback = &plan.steps()[2];
        match &fallback.kind {
            StepKind::QueueExecution { parameters, .. } => {
                assert_eq!(parameters["subtask"], "zzqq");
            }
            other => panic!("expected queue_execution, got {other:?}"),
        }
        assert_eq!(fallback.worker_id(), Some(overall[0].worker_id.as_str()));
        assert_eq!(fallback.worker_id(), Some("ocr-worker"));
        assert_eq!(fallback.tool_name(), Some("extract_text"));

        let output = fallback.step_id.output_ref();
        assert!(matches!(
            &plan.steps()[4].kind,
            StepKind::Aggregate { inputs, .. } if inputs.len() == 3 && inputs.contains(&output)
        ));
        assert_eq!(plan.metadata().estimated_cost_units, Some(150));
    }

    #[test]
    fn test_trust_floor_above_all_workers_escalates() {
        let planner = planner_with(vec![ocr_worker()]);
        let request = PlanRequest::new("extract text from invoice.pdf")
            .with_trust_policy(TrustPolicy::with_minimum(TrustTier::Trusted));

        let strict = TrustPolicy::with_minimum(TrustTier::Trusted);
        assert!(planner.registry().match_intent("extract text", None, Some(&strict)).is_empty());
        let response = planner.create_plan(&request);
        assert_eq!(response.escalation().unwrap().reason, EscalationReason::NoCapableWorkers);
    }

    // === Shape Tests ===

    #[test]
    fn test_simple_plan_async() {
        let planner = planner_with(vec![ocr_worker()]);
        let request = PlanRequest::new("just one quick ocr scan").with_urgency(Priority::High);
        let response = planner.create_plan(&request);

        let (plan, meta) = created(&response);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.metadata().confidence, 0.9);
        assert!(matches!(
            plan.steps()[0].kind,
            StepKind::QueueExecution { priority: Priority::High, timeout_seconds: Some(300), .. }
        ));
        assert!(matches!(
            plan.steps()[1].kind,
            StepKind::WaitFor { timeout_seconds: Some(600), .. }
        ));
        assert_eq!(plan.steps()[1].depends_on, vec![plan.steps()[0].step_id.clone()]);
        assert!(meta.warnings.iter().any(|w| w.contains("no terminal step")));
    }

    #[test]
    fn test_simple_plan_prefers_sync() {
        let planner = planner_with(vec![ocr_worker()]);
        let request = PlanRequest::new("just one quick ocr scan").with_options(PlanningOptions {
            prefer_sync: true,
            ..Default::default()
        });

        let response = planner.create_plan(&request);
        let (plan, meta) = created(&response);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps()[0].step_type(), "call_worker");
        assert_eq!(plan.steps()[0].output_binding.as_deref(), Some("result"));
        assert!((meta.confidence - 0.9 * 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_exact_tool_confidence() {
        let planner = planner_with(vec![ocr_worker()]);
        let response = planner.create_plan(&PlanRequest::new("extract_text"));
        let (_, meta) = created(&response);
        assert!((meta.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_complex_plan_without_workers_escalates() {
        let planner = planner_with(vec![]);
        let request = PlanRequest::new("a and b");
        let analysis = IntentAnalysis::analyze("a and b", 0);
        let plan = planner
            .complex_plan(&request, &analysis, &[], &TrustPolicy::default())
            .unwrap();

        let step = plan.escalation_step().unwrap();
        assert!(matches!(
            &step.kind,
            StepKind::Escalate { reason: EscalationReason::NoCapableWorkers, suggested_options, .. }
                if suggested_options.len() == 2
        ));

        let setback = escalation_from_step(step);
        assert_eq!(setback.error_code, "NO_CAPABLE_WORKERS");
        assert_eq!(setback.message, "Could not find workers for any subtask");
        assert!(setback.context.contains_key("subtasks"));
    }

    // === Constraint Tests ===

    #[test]
    fn test_max_steps_conflict() {
        let planner = planner_with(vec![analyst_worker()]);
        let request = PlanRequest::new("analyze all documents and create comprehensive report")
            .with_options(PlanningOptions {
                max_steps: 3,
                ..Default::default()
            });

        let escalation = planner.create_plan(&request).escalation().cloned().unwrap();
        assert_eq!(escalation.reason, EscalationReason::ConstraintConflict);
        assert!(escalation.message.contains("exceeds maximum 3"));

        let failure = planner.create_plan(&request.without_escalation());
        assert_eq!(failure.failure().unwrap().error_code, "CONSTRAINT_CONFLICT");
    }

    #[test]
    fn test_config_ceiling_applies() {
        let registry = RegistryHandle::default();
        registry.register(analyst_worker()).unwrap();
        let mut config = DelegateConfig::default();
        config.planning.max_plan_steps = 2;
        let planner = Planner::new(registry, config);

        let request = PlanRequest::new("analyze documents");
        assert_eq!(planner.step_limit(&request), 2);
        let response = planner.create_plan(&request);
        assert_eq!(response.escalation().unwrap().reason, EscalationReason::ConstraintConflict);
    }

    #[test]
    fn test_invalid_requests() {
        let planner = planner_with(vec![ocr_worker()]);

        let response = planner.create_plan(&PlanRequest::new("  "));
        assert_eq!(response.escalation().unwrap().reason, EscalationReason::AmbiguousIntent);

        let response = planner.create_plan(&PlanRequest::new("  ").without_escalation());
        assert_eq!(response.failure().unwrap().error_code, "INVALID_REQUEST");

        let mut request = PlanRequest::new("extract text");
        request.planning_options.max_steps = 500;
        assert_eq!(
            planner.create_plan(&request).escalation().unwrap().reason,
            EscalationReason::ConstraintConflict
        );
    }

    // === Metadata Tests ===

    #[test]
    fn test_references_from_context() {
        let planner = planner_with(vec![ocr_worker()]);
        let request = PlanRequest::new("extract text from invoice.pdf").with_context(PlanContext {
            prior_context_refs: vec![42],
            related_task_refs: vec!["task-7".into()],
            user_constraints: vec![],
        });

        let response = planner.create_plan(&request);
        let (plan, _) = created(&response);
        let inputs = &plan.references().input_sources;
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].observation_id, Some(42));
        assert_eq!(inputs[1].task_id.as_deref(), Some("task-7"));

        let outputs = &plan.references().expected_outputs;
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].step_id.as_ref(), Some(&plan.steps()[2].step_id));
        assert_eq!(outputs[0].description.as_deref(), Some("summary"));
    }

    #[test]
    fn test_degraded_worker_warning() {
        let planner = planner_with(vec![ocr_worker()
            .with_availability(WorkerAvailabilityInfo::new(WorkerAvailability::Degraded, 0.5))]);
        let response = planner.create_plan(&PlanRequest::new("extract text from invoice.pdf"));
        let (_, meta) = created(&response);
        assert!(meta
            .warnings
            .contains(&"Worker ocr-worker has degraded availability".to_string()));
    }

    #[test]
    fn test_intent_summary_truncated() {
        let planner = planner_with(vec![ocr_worker()]);
        let long = format!("extract text {}", "x".repeat(300));
        let response = planner.create_plan(&PlanRequest::new(long));
        let (plan, _) = created(&response);
        assert_eq!(plan.metadata().intent_summary.chars().count(), 200);
    }

    #[test]
    fn test_scaled_confidence_without_workers() {
        assert_eq!(scaled_confidence(Complexity::Simple, &[]), 0.9);
        assert_eq!(scaled_confidence(Complexity::Complex, &[]), 0.7);
    }
}
