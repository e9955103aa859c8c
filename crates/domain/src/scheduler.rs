//! Learning scheduler state. Mutated only by the scheduler itself;
//! everyone else reads published immutable snapshots.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::FeatureBucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    Normal,
    Burst,
    Quiet,
    Stopped,
}

impl SchedulerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Burst => "burst",
            Self::Quiet => "quiet",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalMetric {
    RollingSuccess,
    QualityScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Achieved,
    Expired,
}

/// A target like "rolling success ≥ 0.8 for code/complex by Friday".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub bucket: FeatureBucket,
    pub metric: GoalMetric,
    pub target: f64,
    pub deadline_ms: u64,
    pub progress: f64,
    pub status: GoalStatus,
}

impl Goal {
    pub fn new(bucket: FeatureBucket, metric: GoalMetric, target: f64, deadline_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            bucket,
            metric,
            target,
            deadline_ms,
            progress: 0.0,
            status: GoalStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerState {
    pub mode: SchedulerMode,
    /// Set for every burst/quiet; `tick` past this falls back to normal.
    pub mode_ends_at_ms: Option<u64>,
    pub intensity_multiplier: f64,
    pub exploration_rate: f64,
    /// Multiplier applied to the router's shadow rate (quiet halves it).
    pub shadow_multiplier: f64,
    pub active_goals: Vec<Goal>,
}

impl SchedulerState {
    pub fn normal(exploration_rate: f64) -> Self {
        Self {
            mode: SchedulerMode::Normal,
            mode_ends_at_ms: None,
            intensity_multiplier: 1.0,
            exploration_rate,
            shadow_multiplier: 1.0,
            active_goals: Vec::new(),
        }
    }
}
