//! Plan model
//!
//! A [`Plan`] is only obtainable through [`Plan::new`] (or deserialization,
//! which goes through the same checks), so every plan value satisfies:
//!
//! - the schema version is [`PLAN_SCHEMA_VERSION`]
//! - step ids are unique and every `depends_on` id resolves
//! - the dependency relation is acyclic
//! - every step carrying trust info meets the policy's minimum tier
//!
//! Plans are immutable once built.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::PlanError;
use crate::graph::StepGraph;
use crate::trust::{TrustInfo, TrustPolicy};

/// The only supported plan schema
pub const PLAN_SCHEMA_VERSION: &str = "DG-PLAN-0001";

/// Strongly-typed step id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(format!("step-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `${step.output}` reference to this step's output
    pub fn output_ref(&self) -> String {
        format!("${{{}.output}}", self.0)
    }

    /// `${step.output.task_id}` reference to the task this step queued
    pub fn task_id_ref(&self) -> String {
        format!("${{{}.output.task_id}}", self.0)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StepId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<StepId> for String {
    fn from(value: StepId) -> Self {
        value.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq<&str> for StepId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

pub fn generate_plan_id() -> String {
    format!("plan-{}", Uuid::new_v4().simple())
}

/// Execution priority, also used for intent urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Why planning could not produce an executable plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    AmbiguousIntent,
    NoCapableWorkers,
    TrustViolation,
    PolicyViolation,
    ConstraintConflict,
    ResourceUnavailable,
    Other,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmbiguousIntent => "ambiguous_intent",
            Self::NoCapableWorkers => "no_capable_workers",
            Self::TrustViolation => "trust_violation",
            Self::PolicyViolation => "policy_violation",
            Self::ConstraintConflict => "constraint_conflict",
            Self::ResourceUnavailable => "resource_unavailable",
            Self::Other => "other",
        }
    }

    /// Error code used when escalation is disabled
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AmbiguousIntent => "AMBIGUOUS_INTENT",
            Self::NoCapableWorkers => "NO_CAPABLE_WORKERS",
            Self::TrustViolation => "TRUST_VIOLATION",
            Self::PolicyViolation => "POLICY_VIOLATION",
            Self::ConstraintConflict => "CONSTRAINT_CONFLICT",
            Self::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
            Self::Other => "PLANNING_ERROR",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan scope classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanScope {
    #[default]
    SingleTask,
    Workflow,
    Campaign,
}

impl PlanScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleTask => "single_task",
            Self::Workflow => "workflow",
            Self::Campaign => "campaign",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitConditionType {
    TaskCompletion,
    ReceiptPhase,
}

/// Condition a `wait_for` step blocks on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitCondition {
    #[serde(rename = "type")]
    pub condition_type: WaitConditionType,
    /// Task id or `${step.output.task_id}` reference
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default = "default_acceptable_phases")]
    pub acceptable_phases: Vec<String>,
}

fn default_acceptable_phases() -> Vec<String> {
    vec!["complete".to_string(), "escalate".to_string()]
}

impl WaitCondition {
    /// Wait for the task queued by `step` to complete
    pub fn task_completion(step: &StepId) -> Self {
        Self {
            condition_type: WaitConditionType::TaskCompletion,
            task_id: Some(step.task_id_ref()),
            acceptable_phases: default_acceptable_phases(),
        }
    }
}

/// The five step kinds, each with its own required fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepKind {
    /// Synchronous worker call
    CallWorker {
        worker_id: String,
        tool_name: String,
        #[serde(default)]
        parameters: Map<String, Value>,
        #[serde(default)]
        priority: Priority,
    },
    /// Asynchronous execution
    QueueExecution {
        worker_id: String,
        tool_name: String,
        #[serde(default)]
        parameters: Map<String, Value>,
        #[serde(default)]
        priority: Priority,
        #[serde(default)]
        timeout_seconds: Option<u32>,
    },
    /// Block until upstream tasks complete
    WaitFor {
        wait_conditions: Vec<WaitCondition>,
        #[serde(default)]
        timeout_seconds: Option<u32>,
    },
    /// Request synthesis over prior outputs
    Aggregate {
        inputs: Vec<String>,
        #[serde(default)]
        aggregation_instruction: Option<String>,
    },
    /// Cannot proceed; a decision is needed
    Escalate {
        reason: EscalationReason,
        message: String,
        #[serde(default)]
        context: Map<String, Value>,
        #[serde(default)]
        suggested_options: Vec<String>,
    },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CallWorker { .. } => "call_worker",
            Self::QueueExecution { .. } => "queue_execution",
            Self::WaitFor { .. } => "wait_for",
            Self::Aggregate { .. } => "aggregate",
            Self::Escalate { .. } => "escalate",
        }
    }

    fn check(&self) -> Result<(), PlanError> {
        let invalid = |reason: &str| PlanError::InvalidStep {
            kind: self.name(),
            reason: reason.to_string(),
        };

        match self {
            Self::CallWorker { worker_id, tool_name, .. }
            | Self::QueueExecution { worker_id, tool_name, .. } => {
                if worker_id.trim().is_empty() || tool_name.trim().is_empty() {
                    return Err(invalid("requires worker_id and tool_name"));
                }
            }
            Self::WaitFor { wait_conditions, .. } => {
                if wait_conditions.is_empty() {
                    return Err(invalid("requires at least one wait_condition"));
                }
            }
            Self::Aggregate { inputs, .. } => {
                if inputs.is_empty() {
                    return Err(invalid("requires at least one input reference"));
                }
            }
            Self::Escalate { message, .. } => {
                if message.trim().is_empty() {
                    return Err(invalid("requires reason and message"));
                }
            }
        }
        Ok(())
    }
}

/// A single step in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: StepId,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    /// Trust snapshot of the targeted worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<TrustInfo>,
    /// Variable name the step output binds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_binding: Option<String>,
}

impl PlanStep {
    /// Step of the given kind with a fresh id
    pub fn new(kind: StepKind) -> Result<Self, PlanError> {
        kind.check()?;
        Ok(Self {
            step_id: StepId::generate(),
            kind,
            depends_on: Vec::new(),
            trust: None,
            output_binding: None,
        })
    }

    pub fn call_worker(
        worker_id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Result<Self, PlanError> {
        Self::new(StepKind::CallWorker {
            worker_id: worker_id.into(),
            tool_name: tool_name.into(),
            parameters,
            priority: Priority::Normal,
        })
    }

    pub fn queue_execution(
        worker_id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: Map<String, Value>,
        timeout_seconds: u32,
    ) -> Result<Self, PlanError> {
        Self::new(StepKind::QueueExecution {
            worker_id: worker_id.into(),
            tool_name: tool_name.into(),
            parameters,
            priority: Priority::Normal,
            timeout_seconds: Some(timeout_seconds),
        })
    }

    pub fn wait_for(
        wait_conditions: Vec<WaitCondition>,
        timeout_seconds: u32,
    ) -> Result<Self, PlanError> {
        Self::new(StepKind::WaitFor {
            wait_conditions,
            timeout_seconds: Some(timeout_seconds),
        })
    }

    pub fn aggregate(
        inputs: Vec<String>,
        instruction: impl Into<String>,
    ) -> Result<Self, PlanError> {
        Self::new(StepKind::Aggregate {
            inputs,
            aggregation_instruction: Some(instruction.into()),
        })
    }

    pub fn escalate(
        reason: EscalationReason,
        message: impl Into<String>,
    ) -> Result<Self, PlanError> {
        Self::new(StepKind::Escalate {
            reason,
            message: message.into(),
            context: Map::new(),
            suggested_options: Vec::new(),
        })
    }

    pub fn with_id(mut self, step_id: impl Into<StepId>) -> Self {
        self.step_id = step_id.into();
        self
    }

    /// Add dependencies on earlier steps
    pub fn after<I>(mut self, step_ids: I) -> Self
    where
        I: IntoIterator<Item = StepId>,
    {
        self.depends_on.extend(step_ids);
        self
    }

    pub fn with_trust(mut self, trust: TrustInfo) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn bind_output(mut self, name: impl Into<String>) -> Self {
        self.output_binding = Some(name.into());
        self
    }

    /// Set priority on worker steps; other kinds are unchanged
    pub fn with_priority(mut self, value: Priority) -> Self {
        if let StepKind::CallWorker { priority, .. } | StepKind::QueueExecution { priority, .. } =
            &mut self.kind
        {
            *priority = value;
        }
        self
    }

    /// Attach context and options to an escalate step; other kinds are unchanged
    pub fn with_escalation_details(
        mut self,
        details: Map<String, Value>,
        options: Vec<String>,
    ) -> Self {
        if let StepKind::Escalate {
            context,
            suggested_options,
            ..
        } = &mut self.kind
        {
            *context = details;
            *suggested_options = options;
        }
        self
    }

    pub fn step_type(&self) -> &'static str {
        self.kind.name()
    }

    pub fn worker_id(&self) -> Option<&str> {
        match &self.kind {
            StepKind::CallWorker { worker_id, .. } | StepKind::QueueExecution { worker_id, .. } => {
                Some(worker_id)
            }
            _ => None,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        match &self.kind {
            StepKind::CallWorker { tool_name, .. } | StepKind::QueueExecution { tool_name, .. } => {
                Some(tool_name)
            }
            _ => None,
        }
    }

    /// Aggregate and escalate steps end a plan
    pub fn is_terminal_kind(&self) -> bool {
        matches!(self.kind, StepKind::Aggregate { .. } | StepKind::Escalate { .. })
    }
}

/// Plan metadata section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    #[serde(default = "default_schema_version")]
    pub plan_schema_version: String,
    #[serde(default = "generate_plan_id")]
    pub plan_id: String,
    #[serde(default = "default_delegate_id")]
    pub delegate_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub intent_summary: String,
    #[serde(default)]
    pub scope: PlanScope,
    /// Plan quality estimate in [0, 1]
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub estimated_cost_units: Option<u32>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub trust_policy: TrustPolicy,
}

fn default_schema_version() -> String {
    PLAN_SCHEMA_VERSION.to_string()
}

fn default_delegate_id() -> String {
    "delegate-1".to_string()
}

fn default_confidence() -> f64 {
    0.8
}

impl PlanMetadata {
    pub fn new(intent_summary: impl Into<String>, trust_policy: TrustPolicy) -> Self {
        Self {
            plan_schema_version: default_schema_version(),
            plan_id: generate_plan_id(),
            delegate_id: default_delegate_id(),
            created_at: Utc::now(),
            intent_summary: intent_summary.into(),
            scope: PlanScope::SingleTask,
            confidence: default_confidence(),
            estimated_cost_units: None,
            assumptions: Vec::new(),
            trust_policy,
        }
    }
}

/// Reference to data outside the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReference {
    #[serde(rename = "type")]
    pub reference_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PlanReference {
    fn empty(reference_type: &str) -> Self {
        Self {
            reference_type: reference_type.to_string(),
            id: None,
            observation_id: None,
            task_id: None,
            step_id: None,
            relevance: None,
            description: None,
        }
    }

    /// Prior-context observation supplied with the request
    pub fn observation(observation_id: i64) -> Self {
        Self {
            observation_id: Some(observation_id),
            relevance: Some("context".to_string()),
            ..Self::empty("prior_context_observation")
        }
    }

    pub fn related_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            relevance: Some("related_task".to_string()),
            ..Self::empty("related_task")
        }
    }

    /// Output a caller can expect once `step_id` completes
    pub fn step_output(step_id: StepId, binding: Option<String>) -> Self {
        Self {
            step_id: Some(step_id),
            description: binding,
            ..Self::empty("step_output")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanReferences {
    #[serde(default)]
    pub input_sources: Vec<PlanReference>,
    #[serde(default)]
    pub expected_outputs: Vec<PlanReference>,
}

/// Wire shape of a plan before its invariants are checked
#[derive(Deserialize)]
struct PlanDocument {
    metadata: PlanMetadata,
    #[serde(default)]
    steps: Vec<PlanStep>,
    #[serde(default)]
    references: PlanReferences,
}

impl TryFrom<PlanDocument> for Plan {
    type Error = PlanError;

    fn try_from(doc: PlanDocument) -> Result<Self, Self::Error> {
        Plan::new(doc.metadata, doc.steps, doc.references)
    }
}

/// A validated delegation plan: metadata, steps and references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanDocument")]
pub struct Plan {
    metadata: PlanMetadata,
    steps: Vec<PlanStep>,
    references: PlanReferences,
    /// Step indices in dependency order
    #[serde(skip)]
    order: Vec<usize>,
}

impl Plan {
    pub fn new(
        metadata: PlanMetadata,
        steps: Vec<PlanStep>,
        references: PlanReferences,
    ) -> Result<Self, PlanError> {
        if metadata.plan_schema_version != PLAN_SCHEMA_VERSION {
            return Err(PlanError::UnsupportedSchemaVersion(metadata.plan_schema_version));
        }
        if !(0.0..=1.0).contains(&metadata.confidence) {
            return Err(PlanError::InvalidConfidence(metadata.confidence));
        }

        for step in &steps {
            step.kind.check()?;
        }

        let graph = StepGraph::build(&steps)?;
        let sorted = graph.topological_order().ok_or(PlanError::CyclicDependencies)?;

        let required = metadata.trust_policy.minimum_worker_tier;
        for step in &steps {
            if let Some(trust) = &step.trust {
                let actual = trust.effective_tier();
                if actual < required {
                    return Err(PlanError::TrustBelowPolicy {
                        step: step.step_id.clone(),
                        actual,
                        required,
                    });
                }
            }
        }

        let order = sorted
            .iter()
            .filter_map(|id| steps.iter().position(|s| &s.step_id == id))
            .collect();

        Ok(Self {
            metadata,
            steps,
            references,
            order,
        })
    }

    pub fn metadata(&self) -> &PlanMetadata {
        &self.metadata
    }

    pub fn plan_id(&self) -> &str {
        &self.metadata.plan_id
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn references(&self) -> &PlanReferences {
        &self.references
    }

    pub fn step(&self, step_id: &StepId) -> Option<&PlanStep> {
        self.steps.iter().find(|s| &s.step_id == step_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps in an order where every step follows its dependencies
    pub fn execution_order(&self) -> Vec<&PlanStep> {
        self.order.iter().filter_map(|&i| self.steps.get(i)).collect()
    }

    /// Steps nothing else depends on
    pub fn terminal_steps(&self) -> Vec<&PlanStep> {
        self.steps
            .iter()
            .filter(|s| !self.steps.iter().any(|o| o.depends_on.contains(&s.step_id)))
            .collect()
    }

    /// The escalate step, when the plan is nothing but one
    pub fn escalation_step(&self) -> Option<&PlanStep> {
        match self.steps.as_slice() {
            [only] if matches!(only.kind, StepKind::Escalate { .. }) => Some(only),
            _ => None,
        }
    }

    /// Distinct workers targeted by the plan
    pub fn worker_ids(&self) -> BTreeSet<&str> {
        self.steps.iter().filter_map(PlanStep::worker_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::TrustTier;
    use serde_json::json;

    fn metadata() -> PlanMetadata {
        PlanMetadata::new("Test", TrustPolicy::default())
    }

    fn queue(id: &str, tier: TrustTier) -> PlanStep {
        PlanStep::queue_execution("ocr-worker", "extract_text", Map::new(), 300)
            .unwrap()
            .with_id(id)
            .with_trust(TrustInfo::declared(tier).with_verified(tier))
    }

    // === Step Construction Tests ===

    #[test]
    fn test_step_required_fields() {
        assert!(PlanStep::call_worker("", "tool", Map::new()).is_err());
        assert!(PlanStep::queue_execution("w", " ", Map::new(), 300).is_err());
        assert!(PlanStep::wait_for(vec![], 600).is_err());
        assert!(PlanStep::aggregate(vec![], "combine").is_err());
        assert!(PlanStep::escalate(EscalationReason::Other, "").is_err());

        let step = PlanStep::call_worker("w", "tool", Map::new()).unwrap();
        assert!(step.step_id.as_str().starts_with("step-"));
        assert_eq!(step.step_type(), "call_worker");
        assert_eq!(step.worker_id(), Some("w"));
    }

    #[test]
    fn test_step_builders() {
        let step = queue("a", TrustTier::Verified)
            .with_priority(Priority::High)
            .bind_output("result");
        assert!(matches!(step.kind, StepKind::QueueExecution { priority: Priority::High, .. }));
        assert_eq!(step.output_binding.as_deref(), Some("result"));

        let step = PlanStep::escalate(EscalationReason::NoCapableWorkers, "none")
            .unwrap()
            .with_priority(Priority::Critical)
            .with_escalation_details(Map::new(), vec!["Register workers".into()]);
        assert!(step.is_terminal_kind());
        assert!(matches!(
            step.kind,
            StepKind::Escalate { ref suggested_options, .. } if suggested_options.len() == 1
        ));
    }

    #[test]
    fn test_references() {
        let id = StepId::new("step-1");
        assert_eq!(id.output_ref(), "${step-1.output}");
        assert_eq!(id.task_id_ref(), "${step-1.output.task_id}");
        let cond = WaitCondition::task_completion(&id);
        assert_eq!(cond.task_id.as_deref(), Some("${step-1.output.task_id}"));
        assert_eq!(cond.acceptable_phases, vec!["complete", "escalate"]);
    }

    // === Plan Invariant Tests ===

    #[test]
    fn test_empty_plan_is_valid() {
        let plan = Plan::new(metadata(), vec![], PlanReferences::default()).unwrap();
        assert!(plan.is_empty());
        assert!(plan.escalation_step().is_none());
    }

    #[test]
    fn test_schema_version_must_match() {
        let mut meta = metadata();
        meta.plan_schema_version = "DG-PLAN-0002".into();
        let err = Plan::new(meta, vec![], PlanReferences::default()).unwrap_err();
        assert_eq!(err, PlanError::UnsupportedSchemaVersion("DG-PLAN-0002".into()));
    }

    #[test]
    fn test_duplicate_step_ids_rejected() {
        let err = Plan::new(
            metadata(),
            vec![queue("a", TrustTier::Verified), queue("a", TrustTier::Verified)],
            PlanReferences::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateStepId(_)));
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let step = queue("a", TrustTier::Verified).after([StepId::new("missing")]);
        let err = Plan::new(metadata(), vec![step], PlanReferences::default()).unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let a = queue("a", TrustTier::Verified).after([StepId::new("b")]);
        let b = queue("b", TrustTier::Verified).after([StepId::new("a")]);
        let err = Plan::new(metadata(), vec![a, b], PlanReferences::default()).unwrap_err();
        assert_eq!(err, PlanError::CyclicDependencies);
    }

    #[test]
    fn test_trust_below_policy_rejected() {
        let steps = vec![queue("a", TrustTier::Sandbox)];
        let err = Plan::new(metadata(), steps, PlanReferences::default()).unwrap_err();
        assert!(matches!(
            err,
            PlanError::TrustBelowPolicy {
                actual: TrustTier::Sandbox,
                required: TrustTier::Verified,
                ..
            }
        ));
    }

    #[test]
    fn test_declared_tier_used_when_unverified() {
        let step = PlanStep::call_worker("w", "t", Map::new())
            .unwrap()
            .with_trust(TrustInfo::declared(TrustTier::Sandbox));
        assert!(Plan::new(metadata(), vec![step], PlanReferences::default()).is_err());

        let step = PlanStep::call_worker("w", "t", Map::new())
            .unwrap()
            .with_trust(TrustInfo::declared(TrustTier::Trusted));
        assert!(Plan::new(metadata(), vec![step], PlanReferences::default()).is_ok());
    }

    #[test]
    fn test_confidence_bounds() {
        let mut meta = metadata();
        meta.confidence = 1.2;
        assert!(matches!(
            Plan::new(meta, vec![], PlanReferences::default()),
            Err(PlanError::InvalidConfidence(_))
        ));
    }

    #[test]
    fn test_execution_order_and_terminals() {
        let exec = queue("exec", TrustTier::Verified);
        let wait = PlanStep::wait_for(vec![WaitCondition::task_completion(&exec.step_id)], 600)
            .unwrap()
            .with_id("wait")
            .after([exec.step_id.clone()]);
        let agg = PlanStep::aggregate(vec![exec.step_id.output_ref()], "combine")
            .unwrap()
            .with_id("agg")
            .after([wait.step_id.clone()]);

        let plan = Plan::new(metadata(), vec![agg, wait, exec], PlanReferences::default()).unwrap();

        let order: Vec<_> = plan.execution_order().iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(order, vec!["exec", "wait", "agg"]);

        let terminals: Vec<_> = plan.terminal_steps().iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(terminals, vec!["agg"]);
        assert_eq!(plan.worker_ids().into_iter().collect::<Vec<_>>(), vec!["ocr-worker"]);
    }

    // === Serialization Tests ===

    #[test]
    fn test_plan_json_shape() {
        let steps = vec![queue("a", TrustTier::Verified)];
        let plan = Plan::new(metadata(), steps, PlanReferences::default()).unwrap();
        let value = serde_json::to_value(&plan).unwrap();

        assert_eq!(value["metadata"]["plan_schema_version"], "DG-PLAN-0001");
        assert_eq!(value["steps"][0]["step_type"], "queue_execution");
        assert_eq!(value["steps"][0]["timeout_seconds"], 300);
        assert!(value.get("order").is_none());

        let back: Plan = serde_json::from_value(value).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn test_external_plan_is_checked() {
        let doc = json!({
            "metadata": { "intent_summary": "external" },
            "steps": [
                {
                    "step_id": "a",
                    "step_type": "aggregate",
                    "inputs": ["${b.output}"],
                    "depends_on": ["b"]
                },
                {
                    "step_id": "b",
                    "step_type": "aggregate",
                    "inputs": ["${a.output}"],
                    "depends_on": ["a"]
                }
            ]
        });
        let err = serde_json::from_value::<Plan>(doc).unwrap_err();
        assert!(err.to_string().contains("cycles"));

        let doc = json!({
            "metadata": { "intent_summary": "external" },
            "steps": [ { "step_id": "w", "step_type": "wait_for", "wait_conditions": [] } ]
        });
        assert!(serde_json::from_value::<Plan>(doc).is_err());

        let doc = json!({
            "metadata": { "intent_summary": "external" },
            "steps": [
                { "step_id": "e", "step_type": "escalate", "reason": "other", "message": "Done" }
            ]
        });
        let plan: Plan = serde_json::from_value(doc).unwrap();
        assert!(plan.escalation_step().is_some());
    }
}
