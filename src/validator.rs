//! Advisory plan validation
//!
//! Construction invariants live in [`Plan::new`]; this layer adds checks
//! whose findings are reported to the caller rather than enforced.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::plan::{Plan, StepKind};
use crate::trust::{TrustTier, VerificationStatus};

/// Outcome of [`validate_plan`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn invalid(error: String) -> Self {
        Self {
            valid: false,
            errors: vec![error],
            warnings: Vec::new(),
        }
    }
}

/// Check a constructed plan against the step ceiling and advisory rules.
///
/// Exceeding `max_steps` is an error. A missing terminal step and
/// unverified trust claims are warnings.
pub fn validate_plan(plan: &Plan, max_steps: usize) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if plan.len() > max_steps {
        errors.push(format!(
            "Plan has {} steps, exceeds maximum {}",
            plan.len(),
            max_steps
        ));
    }

    let has_terminal = plan
        .steps()
        .iter()
        .any(|s| matches!(s.kind, StepKind::Aggregate { .. } | StepKind::Escalate { .. }));
    if !has_terminal {
        warnings.push("Plan has no terminal step (aggregate or escalate)".to_string());
    }

    for step in plan.steps() {
        let Some(trust) = &step.trust else { continue };
        let unverified = trust.verified_tier.is_none()
            || trust.verification_status == VerificationStatus::Unknown;
        if trust.declared_tier >= TrustTier::Verified && unverified {
            warnings.push(format!(
                "Step {} claims {} tier but has no verification",
                step.step_id, trust.declared_tier
            ));
        }
    }

    debug!(
        plan_id = %plan.plan_id(),
        errors = errors.len(),
        warnings = warnings.len(),
        "Plan validated"
    );

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Validate an externally supplied plan document.
///
/// Construction failures (schema, ids, dependencies, cycles, trust) come
/// back as errors instead of a parse failure.
pub fn validate_plan_value(document: Value, max_steps: usize) -> ValidationReport {
    match serde_json::from_value::<Plan>(document) {
        Ok(plan) => validate_plan(&plan, max_steps),
        Err(e) => ValidationReport::invalid(e.to_string()),
    }
}

pub fn validate_plan_json(json: &str, max_steps: usize) -> ValidationReport {
    match serde_json::from_str::<Plan>(json) {
        Ok(plan) => validate_plan(&plan, max_steps),
        Err(e) => ValidationReport::invalid(e.to_string()),
    }
}
