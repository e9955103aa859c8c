//! Control event topics consumed by dashboards and the audit log.

/// Topic name constants for the control bus.
pub struct Topics;

impl Topics {
    pub const PLAN_CREATED: &'static str = "plan.created";
    pub const PLAN_COMPLETED: &'static str = "plan.completed";
    pub const SCHEDULER_MODE_CHANGED: &'static str = "scheduler.mode_changed";
    pub const CONFIG_UPDATED: &'static str = "config.updated";
    pub const PROVIDER_HEALTH_CHANGED: &'static str = "provider.health_changed";

    pub fn all() -> Vec<&'static str> {
        vec![
            Self::PLAN_CREATED,
            Self::PLAN_COMPLETED,
            Self::SCHEDULER_MODE_CHANGED,
            Self::CONFIG_UPDATED,
            Self::PROVIDER_HEALTH_CHANGED,
        ]
    }
}
