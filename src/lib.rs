//! # Delegate
//!
//! Capability-brokering planner. Turns a natural-language intent into a
//! validated delegation plan over registered workers, without executing
//! anything itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          DELEGATE SERVICE                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐               │
//! │  │    Intent    │  │   Planner    │  │  Validator   │               │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘               │
//! └─────────┼─────────────────┼─────────────────┼───────────────────────┘
//!           │                 │                 │
//!           ▼                 ▼                 ▼
//!   ┌──────────────┐   ┌─────────────┐   ┌─────────────┐
//!   │   Worker     │   │ Plan Store  │   │  Receipt    │──► ReceiptSink
//!   │   Registry   │   │             │   │  Worker     │
//!   └──────┬───────┘   └─────────────┘   └─────────────┘
//!          │
//!     ┌────┴────┬─────────┐
//!     ▼         ▼         ▼
//!   ┌───┐     ┌───┐     ┌───┐
//!   │W1 │     │W2 │     │W3 │   workers advertise capabilities + trust
//!   └───┘     └───┘     └───┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Worker**: an external executor advertising capabilities and a trust tier
//! - **Plan**: an acyclic graph of typed steps plus metadata and references
//! - **Escalation**: the soft outcome when no safe plan can be built
//! - **Receipt**: an auditable record of a planning outcome

pub mod config;
pub mod error;
pub mod graph;
pub mod intent;
pub mod plan;
pub mod planner;
pub mod receipts;
pub mod registry;
pub mod request;
pub mod service;
pub mod store;
pub mod trust;
pub mod validator;
pub mod worker;

pub use config::{DelegateConfig, PlanningConfig, ReceiptConfig, TrustConfig};
pub use error::{DelegateError, PlanError, RegistrationError, RequestError, StoreError};
pub use intent::{Complexity, IntentAnalysis};
pub use plan::{
    EscalationReason, Plan, PlanMetadata, PlanReferences, PlanScope, PlanStep, Priority, StepId,
    StepKind, WaitCondition, PLAN_SCHEMA_VERSION,
};
pub use planner::Planner;
pub use receipts::{
    DeliveryError, LoggingSink, PlanFact, Receipt, ReceiptEmitter, ReceiptSink, ReceiptWorker,
};
pub use registry::{MatchConstraints, RegistryHandle, TrustVerifier, WorkerRegistry};
pub use request::{Escalation, PlanRequest, PlanResponse, PlanningFailure, PlanningMetadata};
pub use service::{DelegateService, ServiceInfo};
pub use store::{InMemoryPlanStore, PlanStore};
pub use trust::{TrustInfo, TrustPolicy, TrustTier, VerificationStatus};
pub use validator::{validate_plan, ValidationReport};
pub use worker::{WorkerAvailability, WorkerCapability, WorkerManifest, WorkerSearchResult};
