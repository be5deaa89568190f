//! Planning request and response envelopes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RequestError;
use crate::plan::{EscalationReason, Plan, Priority};
use crate::trust::TrustPolicy;

/// Upper bound accepted for `max_steps`
pub const MAX_STEPS_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    #[default]
    NaturalLanguage,
    StructuredTask,
}

/// The intent to fulfil
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentInput {
    #[serde(rename = "type", default)]
    pub kind: IntentKind,
    pub content: String,
    /// Priority given to the plan's execution steps
    #[serde(default)]
    pub urgency: Priority,
}

/// Context supplied alongside the intent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanContext {
    /// Prior-context observation ids
    pub prior_context_refs: Vec<i64>,
    /// Related task ids
    pub related_task_refs: Vec<String>,
    pub user_constraints: Vec<String>,
}

impl PlanContext {
    /// Total number of context items
    pub fn len(&self) -> usize {
        self.prior_context_refs.len() + self.related_task_refs.len() + self.user_constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningOptions {
    /// Step ceiling for the plan, 1..=100
    pub max_steps: u32,
    pub allow_escalation: bool,
    /// Use synchronous calls where the plan shape allows it
    pub prefer_sync: bool,
    /// Policy for this plan; the configured default tier applies when absent
    pub trust_policy: Option<TrustPolicy>,
}

impl Default for PlanningOptions {
    fn default() -> Self {
        Self {
            max_steps: 20,
            allow_escalation: true,
            prefer_sync: false,
            trust_policy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub intent: IntentInput,
    #[serde(default)]
    pub context: PlanContext,
    #[serde(default)]
    pub planning_options: PlanningOptions,
}

impl PlanRequest {
    /// Natural-language request with default context and options
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            intent: IntentInput {
                kind: IntentKind::NaturalLanguage,
                content: content.into(),
                urgency: Priority::Normal,
            },
            context: PlanContext::default(),
            planning_options: PlanningOptions::default(),
        }
    }

    pub fn with_urgency(mut self, urgency: Priority) -> Self {
        self.intent.urgency = urgency;
        self
    }

    pub fn with_context(mut self, context: PlanContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_options(mut self, options: PlanningOptions) -> Self {
        self.planning_options = options;
        self
    }

    pub fn with_trust_policy(mut self, policy: TrustPolicy) -> Self {
        self.planning_options.trust_policy = Some(policy);
        self
    }

    pub fn without_escalation(mut self) -> Self {
        self.planning_options.allow_escalation = false;
        self
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.intent.content.trim().is_empty() {
            return Err(RequestError::EmptyIntent);
        }
        let max_steps = self.planning_options.max_steps;
        if !(1..=MAX_STEPS_LIMIT).contains(&max_steps) {
            return Err(RequestError::MaxStepsOutOfRange(max_steps));
        }
        Ok(())
    }
}

/// Metadata about one planning run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanningMetadata {
    pub workers_considered: usize,
    pub planning_duration_ms: u64,
    pub confidence: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Soft failure: planning cannot proceed without a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub reason: EscalationReason,
    pub message: String,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Hard failure, returned when escalation is disabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningFailure {
    pub error_code: String,
    pub message: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// The three terminal outcomes of a planning request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlanResponse {
    PlanCreated {
        plan: Plan,
        planning_metadata: PlanningMetadata,
    },
    RequiresEscalation(Escalation),
    PlanningFailed(PlanningFailure),
}

impl PlanResponse {
    pub fn status(&self) -> &'static str {
        match self {
            Self::PlanCreated { .. } => "plan_created",
            Self::RequiresEscalation(_) => "requires_escalation",
            Self::PlanningFailed(_) => "planning_failed",
        }
    }

    pub fn plan(&self) -> Option<&Plan> {
        match self {
            Self::PlanCreated { plan, .. } => Some(plan),
            _ => None,
        }
    }

    pub fn escalation(&self) -> Option<&Escalation> {
        match self {
            Self::RequiresEscalation(escalation) => Some(escalation),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&PlanningFailure> {
        match self {
            Self::PlanningFailed(failure) => Some(failure),
            _ => None,
        }
    }
}
