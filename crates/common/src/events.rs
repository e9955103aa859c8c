//! Immutable control event records published on the [`crate::ControlBus`].
//!
//! Components never hold back-pointers to each other; changes are
//! communicated through these small records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::topics::Topics;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    PlanCreated {
        plan_id: Uuid,
        execution_mode: String,
        primary_provider: Option<String>,
    },
    PlanCompleted {
        plan_id: Uuid,
        status: String,
    },
    SchedulerModeChanged {
        from: String,
        to: String,
    },
    ConfigUpdated {
        domain: String,
        key: String,
    },
    ProviderHealthChanged {
        id: String,
        from: String,
        to: String,
    },
}

impl ControlEvent {
    /// Topic this event belongs to.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::PlanCreated { .. } => Topics::PLAN_CREATED,
            Self::PlanCompleted { .. } => Topics::PLAN_COMPLETED,
            Self::SchedulerModeChanged { .. } => Topics::SCHEDULER_MODE_CHANGED,
            Self::ConfigUpdated { .. } => Topics::CONFIG_UPDATED,
            Self::ProviderHealthChanged { .. } => Topics::PROVIDER_HEALTH_CHANGED,
        }
    }
}
