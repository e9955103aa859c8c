//! Learning scheduler: burst / quiet / normal / stopped modes, goal
//! tracking, and the published state snapshot the router reads.
//!
//! Only the scheduler mutates [`SchedulerState`]; everyone else observes
//! immutable snapshots through a watch channel, swapped atomically on each
//! transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use common::clock::Clock;
use common::config::SchedulerConfig;
use common::errors::CoreError;
use common::event_bus::ControlBus;
use common::events::ControlEvent;
use domain::outcome::Outcome;
use domain::scheduler::{Goal, GoalMetric, GoalStatus, SchedulerMode, SchedulerState};
use feedback::Ewma;

const GOAL_HALF_LIFE: u32 = 20;

struct SchedulerInner {
    state: SchedulerState,
    /// Per-goal progress EWMAs, keyed by goal id.
    goal_progress: HashMap<Uuid, Ewma>,
}

pub struct LearningScheduler {
    inner: RwLock<SchedulerInner>,
    state_tx: watch::Sender<SchedulerState>,
    config: RwLock<SchedulerConfig>,
    /// Epsilon clamps mirrored from the routing domain.
    epsilon_bounds: RwLock<(f64, f64)>,
    bus: ControlBus,
    clock: Arc<dyn Clock>,
}

impl LearningScheduler {
    pub fn new(
        config: SchedulerConfig,
        min_epsilon: f64,
        max_epsilon: f64,
        bus: ControlBus,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, watch::Receiver<SchedulerState>) {
        let initial = SchedulerState::normal(config.base_exploration);
        let (state_tx, state_rx) = watch::channel(initial.clone());
        let scheduler = Arc::new(Self {
            inner: RwLock::new(SchedulerInner {
                state: initial,
                goal_progress: HashMap::new(),
            }),
            state_tx,
            config: RwLock::new(config),
            epsilon_bounds: RwLock::new((min_epsilon, max_epsilon)),
            bus,
            clock,
        });
        (scheduler, state_rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    pub async fn state(&self) -> SchedulerState {
        self.inner.read().await.state.clone()
    }

    pub async fn update_config(&self, config: SchedulerConfig) {
        *self.config.write().await = config;
    }

    pub async fn update_epsilon_bounds(&self, min_epsilon: f64, max_epsilon: f64) {
        *self.epsilon_bounds.write().await = (min_epsilon, max_epsilon);
    }

    /// Periodic pulse. Idempotent: expired burst/quiet windows fall back to
    /// normal, goals past their deadline expire. Safe to call at any rate.
    pub async fn tick(&self) {
        let now = self.clock.now_ms();
        let config = self.config.read().await.clone();
        let mut inner = self.inner.write().await;

        let expired = matches!(
            inner.state.mode,
            SchedulerMode::Burst | SchedulerMode::Quiet
        ) && inner
            .state
            .mode_ends_at_ms
            .map(|ends| now >= ends)
            .unwrap_or(false);

        let from = inner.state.mode;
        if expired {
            inner.state.mode = SchedulerMode::Normal;
            inner.state.mode_ends_at_ms = None;
            inner.state.intensity_multiplier = 1.0;
            inner.state.shadow_multiplier = 1.0;
            inner.state.exploration_rate = config.base_exploration;
            info!(from = from.as_str(), "scheduler window expired; back to normal");
        }

        for goal in inner.state.active_goals.iter_mut() {
            if goal.status == GoalStatus::Active && now >= goal.deadline_ms {
                goal.status = GoalStatus::Expired;
                debug!(goal = %goal.id, "goal expired");
            }
        }

        let state = inner.state.clone();
        drop(inner);
        let _ = self.state_tx.send(state);
        if expired {
            self.bus
                .publish(ControlEvent::SchedulerModeChanged {
                    from: from.as_str().to_string(),
                    to: SchedulerMode::Normal.as_str().to_string(),
                })
                .await;
        }
    }

    /// External mode request from an operator or the chat surface.
    pub async fn request_mode(
        &self,
        mode: SchedulerMode,
        duration: Option<Duration>,
        intensity: Option<f64>,
    ) -> Result<(), CoreError> {
        let now = self.clock.now_ms();
        let config = self.config.read().await.clone();
        let (min_epsilon, max_epsilon) = *self.epsilon_bounds.read().await;
        let mut inner = self.inner.write().await;

        // The only way out of an emergency stop is an explicit normal.
        if inner.state.mode == SchedulerMode::Stopped && mode != SchedulerMode::Normal {
            return Err(CoreError::SchedulerLocked);
        }

        let from = inner.state.mode;
        match mode {
            SchedulerMode::Burst => {
                let duration = duration.unwrap_or(Duration::from_secs(60));
                let capped = duration.min(Duration::from_secs(config.max_burst_secs));
                let intensity = intensity.unwrap_or(2.0).clamp(1.0, config.max_intensity);
                inner.state.mode = SchedulerMode::Burst;
                inner.state.mode_ends_at_ms = Some(now + capped.as_millis() as u64);
                inner.state.intensity_multiplier = intensity;
                inner.state.shadow_multiplier = 1.0;
                inner.state.exploration_rate =
                    (config.base_exploration * intensity).min(max_epsilon);
            }
            SchedulerMode::Quiet => {
                let duration = duration.unwrap_or(Duration::from_secs(300));
                inner.state.mode = SchedulerMode::Quiet;
                inner.state.mode_ends_at_ms = Some(now + duration.as_millis() as u64);
                inner.state.intensity_multiplier = 1.0;
                inner.state.shadow_multiplier = 0.5;
                inner.state.exploration_rate = min_epsilon;
            }
            SchedulerMode::Normal => {
                inner.state.mode = SchedulerMode::Normal;
                inner.state.mode_ends_at_ms = None;
                inner.state.intensity_multiplier = 1.0;
                inner.state.shadow_multiplier = 1.0;
                inner.state.exploration_rate = config.base_exploration;
            }
            SchedulerMode::Stopped => {
                inner.state.mode = SchedulerMode::Stopped;
                inner.state.mode_ends_at_ms = None;
            }
        }

        let state = inner.state.clone();
        drop(inner);
        let _ = self.state_tx.send(state);
        info!(from = from.as_str(), to = mode.as_str(), "scheduler mode changed");
        self.bus
            .publish(ControlEvent::SchedulerModeChanged {
                from: from.as_str().to_string(),
                to: mode.as_str().to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn add_goal(&self, goal: Goal) {
        let mut inner = self.inner.write().await;
        inner
            .goal_progress
            .insert(goal.id, Ewma::with_half_life(GOAL_HALF_LIFE));
        inner.state.active_goals.push(goal);
        let state = inner.state.clone();
        drop(inner);
        let _ = self.state_tx.send(state);
    }

    pub async fn remove_goal(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        let before = inner.state.active_goals.len();
        inner.state.active_goals.retain(|g| g.id != id);
        inner.goal_progress.remove(&id);
        let removed = inner.state.active_goals.len() != before;
        let state = inner.state.clone();
        drop(inner);
        let _ = self.state_tx.send(state);
        removed
    }

    /// Observer invoked for every accepted outcome. Never fails; goals
    /// either progress, achieve, or expire.
    pub async fn on_outcome(&self, outcome: &Outcome) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.write().await;
        let SchedulerInner {
            state,
            goal_progress,
        } = &mut *inner;
        let mut changed = false;
        for goal in state.active_goals.iter_mut() {
            if goal.status != GoalStatus::Active || goal.bucket != outcome.bucket {
                continue;
            }
            let sample = match goal.metric {
                GoalMetric::RollingSuccess => {
                    if outcome.success {
                        1.0
                    } else {
                        0.0
                    }
                }
                GoalMetric::QualityScore => outcome.quality_score,
            };
            let ewma = goal_progress
                .entry(goal.id)
                .or_insert_with(|| Ewma::with_half_life(GOAL_HALF_LIFE));
            ewma.update(sample);
            goal.progress = ewma.value();
            changed = true;

            if now >= goal.deadline_ms {
                goal.status = GoalStatus::Expired;
            } else if goal.progress >= goal.target {
                goal.status = GoalStatus::Achieved;
                info!(goal = %goal.id, progress = goal.progress, "goal achieved");
            }
        }
        if changed {
            let state = inner.state.clone();
            drop(inner);
            let _ = self.state_tx.send(state);
        }
    }

    /// Serializable snapshot persisted alongside the feedback snapshot.
    pub async fn snapshot_state(&self) -> SchedulerState {
        self.inner.read().await.state.clone()
    }

    /// Restore process-lived state on startup.
    pub async fn restore_state(&self, state: SchedulerState) {
        let mut inner = self.inner.write().await;
        inner.goal_progress = state
            .active_goals
            .iter()
            .map(|g| {
                let mut ewma = Ewma::with_half_life(GOAL_HALF_LIFE);
                if g.progress > 0.0 {
                    ewma.update(g.progress);
                }
                (g.id, ewma)
            })
            .collect();
        inner.state = state.clone();
        drop(inner);
        let _ = self.state_tx.send(state);
    }
}
