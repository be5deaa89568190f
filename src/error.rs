//! Delegate error types

use thiserror::Error;

use crate::config::ConfigError;
use crate::plan::StepId;
use crate::trust::TrustTier;

/// A plan or step that violates a construction invariant.
///
/// Values of [`crate::Plan`] can only be obtained through checks that return
/// this error, so an invalid plan is never observable downstream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    /// Schema version is not the supported literal
    #[error("Unsupported schema version: {0}")]
    UnsupportedSchemaVersion(String),

    /// Two steps share an identifier
    #[error("Step IDs must be unique within plan: {0} appears more than once")]
    DuplicateStepId(StepId),

    /// A `depends_on` entry names a step that is not in the plan
    #[error("Step {step} depends on non-existent step {missing}")]
    UnknownDependency { step: StepId, missing: StepId },

    /// The dependency relation is not a DAG
    #[error("Dependency graph contains cycles")]
    CyclicDependencies,

    /// A step's worker is below the plan's minimum trust tier
    #[error("Step {step} worker trust tier {actual} is below minimum required {required}")]
    TrustBelowPolicy {
        step: StepId,
        actual: TrustTier,
        required: TrustTier,
    },

    /// A step is missing a field its kind requires
    #[error("Invalid {kind} step: {reason}")]
    InvalidStep { kind: &'static str, reason: String },

    /// Confidence outside [0, 1]
    #[error("Plan confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),
}

/// Worker registration failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    /// Untrusted workers are disabled by policy
    #[error("Untrusted worker registration is disabled: {0}")]
    UntrustedRejected(String),

    /// The manifest itself is malformed
    #[error("Invalid manifest for worker '{worker_id}': {reason}")]
    InvalidManifest { worker_id: String, reason: String },
}

/// Malformed plan requests
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("Intent content is empty")]
    EmptyIntent,

    #[error("max_steps must be between 1 and 100, got {0}")]
    MaxStepsOutOfRange(u32),
}

/// Plan persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Plan store unavailable: {0}")]
    Unavailable(String),

    #[error("Plan serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced at the service boundary
#[derive(Debug, Error)]
pub enum DelegateError {
    /// Plan construction error
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Registration rejected
    #[error("Registration rejected: {0}")]
    RegistrationRejected(#[from] RegistrationError),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// Worker not found
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_error_messages() {
        let err = PlanError::UnknownDependency {
            step: StepId::new("step-b"),
            missing: StepId::new("step-x"),
        };
        assert_eq!(err.to_string(), "Step step-b depends on non-existent step step-x");

        let err = PlanError::TrustBelowPolicy {
            step: StepId::new("step-a"),
            actual: TrustTier::Sandbox,
            required: TrustTier::Verified,
        };
        assert!(err.to_string().contains("sandbox"));
        assert!(err.to_string().contains("verified"));
    }

    #[test]
    fn test_delegate_error_from() {
        let err: DelegateError = RegistrationError::UntrustedRejected("w1".into()).into();
        assert!(matches!(err, DelegateError::RegistrationRejected(_)));

        let err: DelegateError = RequestError::EmptyIntent.into();
        assert!(err.to_string().starts_with("Invalid request"));
    }
}
