//! Domain model and contracts for the orchestration core.
//!
//! Everything here is either an immutable data record (requests, plans,
//! outcomes, envelopes) or a capability trait the core consumes from the
//! outside world (provider adapters, persistence, scorers, sinks).

pub mod contracts;
pub mod envelope;
pub mod features;
pub mod outcome;
pub mod plan;
pub mod provider;
pub mod request;
pub mod scheduler;

pub use contracts::{
    AdapterCall, AdapterReply, AppendLog, ProviderAdapter, Scorer, Sink, SnapshotStore,
    StageSummary, TokenUsage,
};
pub use envelope::{
    Envelope, EnvelopeMeta, EnvelopeStatus, ExplorationMeta, PrimaryRef, ProviderRole,
    ProviderTrace, RoutingMeta, Totals, ValidationStatus,
};
pub use features::{Complexity, FeatureBucket, Features, LengthBucket, TaskDomain};
pub use outcome::Outcome;
pub use plan::{ExecutionMode, Plan, PlanShape, StageAssignment, StageKind};
pub use provider::{Capability, CostModel, HealthState, Provider, ProviderId};
pub use request::{BudgetTier, ChatTurn, Mode, ProviderOverride, Request, Role, TaskType};
pub use scheduler::{Goal, GoalMetric, GoalStatus, SchedulerMode, SchedulerState};
