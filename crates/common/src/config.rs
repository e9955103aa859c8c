//! Versioned runtime configuration.
//!
//! One document with four domains (`routing`, `learning`, `scheduler`,
//! `budget`). Runtime updates validate the new value, bump the version,
//! swap the active snapshot atomically, append to the version log, and
//! publish `config.updated`. A rejected update leaves the old version
//! active. Readers hold an `Arc` snapshot and never observe a torn write.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::errors::CoreError;
use crate::event_bus::ControlBus;
use crate::events::ControlEvent;

/// Per-key metadata used at the update boundary.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    pub key: &'static str,
    pub runtime_updateable: bool,
    pub requires_restart: bool,
}

/// Routing domain knobs read by the routing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub min_epsilon: f64,
    pub max_epsilon: f64,
    pub shadow_rate: f64,
    pub ensemble_size: usize,
    pub min_sample_threshold: u32,
    pub recipe_boost: f64,
    pub recipes_enabled: bool,
    /// Profiles older than this are ignored as routing candidates.
    pub profile_ttl_ms: Option<u64>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_epsilon: 0.02,
            max_epsilon: 0.5,
            shadow_rate: 0.1,
            ensemble_size: 3,
            min_sample_threshold: 5,
            recipe_boost: 1.0,
            recipes_enabled: true,
            profile_ttl_ms: None,
        }
    }
}

/// Learning domain knobs read by the feedback ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// EWMA half-life measured in attempts.
    pub ewma_half_life: u32,
    pub queue_capacity: usize,
    pub snapshot_interval_ms: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            ewma_half_life: 20,
            queue_capacity: 1024,
            snapshot_interval_ms: 60_000,
        }
    }
}

/// Scheduler domain knobs read by the learning scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub base_exploration: f64,
    pub tick_interval_ms: u64,
    pub max_burst_secs: u64,
    pub max_intensity: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_exploration: 0.1,
            tick_interval_ms: 1_000,
            max_burst_secs: 3_600,
            max_intensity: 4.0,
        }
    }
}

/// Budget domain knobs read by the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub call_timeout_ms: u64,
    pub ensemble_timeout_ms: u64,
    pub validation_slack_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            ensemble_timeout_ms: 45_000,
            validation_slack_ms: 10_000,
            max_retries: 2,
            backoff_base_ms: 200,
            backoff_cap_ms: 3_000,
        }
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub routing: RoutingConfig,
    pub learning: LearningConfig,
    pub scheduler: SchedulerConfig,
    pub budget: BudgetConfig,
}

impl RoutingConfig {
    pub fn keys() -> &'static [KeySpec] {
        &[
            KeySpec { key: "min_epsilon", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "max_epsilon", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "shadow_rate", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "ensemble_size", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "min_sample_threshold", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "recipe_boost", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "recipes_enabled", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "profile_ttl_ms", runtime_updateable: true, requires_restart: false },
        ]
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<Value, String> {
        match key {
            "min_epsilon" => {
                let new = unit_interval(value)?;
                Ok(std::mem::replace(&mut self.min_epsilon, new).into())
            }
            "max_epsilon" => {
                let new = unit_interval(value)?;
                if new < self.min_epsilon {
                    return Err("max_epsilon below min_epsilon".into());
                }
                Ok(std::mem::replace(&mut self.max_epsilon, new).into())
            }
            "shadow_rate" => {
                let new = unit_interval(value)?;
                Ok(std::mem::replace(&mut self.shadow_rate, new).into())
            }
            "ensemble_size" => {
                let new = positive_usize(value)?;
                if new < 2 {
                    return Err("ensemble_size must be at least 2".into());
                }
                Ok((std::mem::replace(&mut self.ensemble_size, new) as u64).into())
            }
            "min_sample_threshold" => {
                let new = non_negative_u32(value)?;
                Ok(std::mem::replace(&mut self.min_sample_threshold, new).into())
            }
            "recipe_boost" => {
                let new = positive_f64(value)?;
                Ok(std::mem::replace(&mut self.recipe_boost, new).into())
            }
            "recipes_enabled" => {
                let new = value.as_bool().ok_or("expected a boolean")?;
                Ok(std::mem::replace(&mut self.recipes_enabled, new).into())
            }
            "profile_ttl_ms" => {
                let new = match value {
                    Value::Null => None,
                    other => Some(positive_u64(other)?),
                };
                let old = std::mem::replace(&mut self.profile_ttl_ms, new);
                Ok(old.map(Value::from).unwrap_or(Value::Null))
            }
            other => Err(format!("unknown routing key `{other}`")),
        }
    }
}

impl LearningConfig {
    pub fn keys() -> &'static [KeySpec] {
        &[
            KeySpec { key: "ewma_half_life", runtime_updateable: false, requires_restart: true },
            KeySpec { key: "queue_capacity", runtime_updateable: false, requires_restart: true },
            KeySpec { key: "snapshot_interval_ms", runtime_updateable: true, requires_restart: false },
        ]
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<Value, String> {
        match key {
            "ewma_half_life" => {
                let new = non_negative_u32(value)?;
                if new == 0 {
                    return Err("ewma_half_life must be positive".into());
                }
                Ok(std::mem::replace(&mut self.ewma_half_life, new).into())
            }
            "queue_capacity" => {
                let new = positive_usize(value)?;
                Ok((std::mem::replace(&mut self.queue_capacity, new) as u64).into())
            }
            "snapshot_interval_ms" => {
                let new = positive_u64(value)?;
                Ok(std::mem::replace(&mut self.snapshot_interval_ms, new).into())
            }
            other => Err(format!("unknown learning key `{other}`")),
        }
    }
}

impl SchedulerConfig {
    pub fn keys() -> &'static [KeySpec] {
        &[
            KeySpec { key: "base_exploration", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "tick_interval_ms", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "max_burst_secs", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "max_intensity", runtime_updateable: true, requires_restart: false },
        ]
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<Value, String> {
        match key {
            "base_exploration" => {
                let new = unit_interval(value)?;
                Ok(std::mem::replace(&mut self.base_exploration, new).into())
            }
            "tick_interval_ms" => {
                let new = positive_u64(value)?;
                Ok(std::mem::replace(&mut self.tick_interval_ms, new).into())
            }
            "max_burst_secs" => {
                let new = positive_u64(value)?;
                Ok(std::mem::replace(&mut self.max_burst_secs, new).into())
            }
            "max_intensity" => {
                let new = positive_f64(value)?;
                Ok(std::mem::replace(&mut self.max_intensity, new).into())
            }
            other => Err(format!("unknown scheduler key `{other}`")),
        }
    }
}

impl BudgetConfig {
    pub fn keys() -> &'static [KeySpec] {
        &[
            KeySpec { key: "call_timeout_ms", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "ensemble_timeout_ms", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "validation_slack_ms", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "max_retries", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "backoff_base_ms", runtime_updateable: true, requires_restart: false },
            KeySpec { key: "backoff_cap_ms", runtime_updateable: true, requires_restart: false },
        ]
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<Value, String> {
        match key {
            "call_timeout_ms" => {
                let new = positive_u64(value)?;
                Ok(std::mem::replace(&mut self.call_timeout_ms, new).into())
            }
            "ensemble_timeout_ms" => {
                let new = positive_u64(value)?;
                Ok(std::mem::replace(&mut self.ensemble_timeout_ms, new).into())
            }
            "validation_slack_ms" => {
                let new = positive_u64(value)?;
                Ok(std::mem::replace(&mut self.validation_slack_ms, new).into())
            }
            "max_retries" => {
                let new = non_negative_u32(value)?;
                Ok(std::mem::replace(&mut self.max_retries, new).into())
            }
            "backoff_base_ms" => {
                let new = positive_u64(value)?;
                Ok(std::mem::replace(&mut self.backoff_base_ms, new).into())
            }
            "backoff_cap_ms" => {
                let new = positive_u64(value)?;
                Ok(std::mem::replace(&mut self.backoff_cap_ms, new).into())
            }
            other => Err(format!("unknown budget key `{other}`")),
        }
    }
}

fn unit_interval(value: &Value) -> Result<f64, String> {
    let v = value.as_f64().ok_or("expected a number")?;
    if !(0.0..=1.0).contains(&v) {
        return Err(format!("{v} outside [0, 1]"));
    }
    Ok(v)
}

fn positive_f64(value: &Value) -> Result<f64, String> {
    let v = value.as_f64().ok_or("expected a number")?;
    if v <= 0.0 {
        return Err(format!("{v} must be positive"));
    }
    Ok(v)
}

fn positive_u64(value: &Value) -> Result<u64, String> {
    let v = value.as_u64().ok_or("expected a non-negative integer")?;
    if v == 0 {
        return Err("must be positive".into());
    }
    Ok(v)
}

fn positive_usize(value: &Value) -> Result<usize, String> {
    positive_u64(value).map(|v| v as usize)
}

fn non_negative_u32(value: &Value) -> Result<u32, String> {
    let v = value.as_u64().ok_or("expected a non-negative integer")?;
    u32::try_from(v).map_err(|_| "out of range".into())
}

/// One applied update in the version log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChange {
    pub version: u64,
    pub domain: String,
    pub key: String,
    pub old_value: Value,
    pub new_value: Value,
    pub ts_ms: u64,
}

/// Active config plus its version counter.
#[derive(Debug, Clone)]
pub struct VersionedConfig {
    pub version: u64,
    pub config: CoreConfig,
}

pub struct ConfigStore {
    active: RwLock<Arc<VersionedConfig>>,
    version_log: Mutex<Vec<ConfigChange>>,
    bus: ControlBus,
    clock: Arc<dyn crate::clock::Clock>,
}

impl ConfigStore {
    pub fn new(initial: CoreConfig, bus: ControlBus, clock: Arc<dyn crate::clock::Clock>) -> Self {
        Self {
            active: RwLock::new(Arc::new(VersionedConfig {
                version: 1,
                config: initial,
            })),
            version_log: Mutex::new(Vec::new()),
            bus,
            clock,
        }
    }

    /// Point-in-time snapshot of the active config.
    pub async fn snapshot(&self) -> Arc<VersionedConfig> {
        self.active.read().await.clone()
    }

    /// Apply one runtime update. Validation failures reject the update and
    /// keep the old version active.
    pub async fn update(&self, domain: &str, key: &str, value: Value) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::ConfigInvalid {
            domain: domain.to_string(),
            key: key.to_string(),
            reason,
        };

        let spec = Self::key_spec(domain, key)
            .ok_or_else(|| invalid(format!("unknown key `{domain}.{key}`")))?;
        if !spec.runtime_updateable {
            warn!(domain, key, "rejected update to non-runtime key");
            return Err(invalid("not runtime-updateable".into()));
        }

        let mut guard = self.active.write().await;
        let mut next = (**guard).clone();
        let old_value = match domain {
            "routing" => next.config.routing.set(key, &value),
            "learning" => next.config.learning.set(key, &value),
            "scheduler" => next.config.scheduler.set(key, &value),
            "budget" => next.config.budget.set(key, &value),
            other => Err(format!("unknown domain `{other}`")),
        }
        .map_err(invalid)?;

        next.version += 1;
        let change = ConfigChange {
            version: next.version,
            domain: domain.to_string(),
            key: key.to_string(),
            old_value,
            new_value: value,
            ts_ms: self.clock.now_ms(),
        };
        *guard = Arc::new(next);
        drop(guard);

        info!(domain, key, version = change.version, "config updated");
        self.version_log.lock().await.push(change);
        self.bus
            .publish(ControlEvent::ConfigUpdated {
                domain: domain.to_string(),
                key: key.to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn history(&self) -> Vec<ConfigChange> {
        self.version_log.lock().await.clone()
    }

    fn key_spec(domain: &str, key: &str) -> Option<KeySpec> {
        let table: &[KeySpec] = match domain {
            "routing" => RoutingConfig::keys(),
            "learning" => LearningConfig::keys(),
            "scheduler" => SchedulerConfig::keys(),
            "budget" => BudgetConfig::keys(),
            _ => return None,
        };
        table.iter().find(|spec| spec.key == key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn store() -> ConfigStore {
        ConfigStore::new(
            CoreConfig::default(),
            ControlBus::default(),
            Arc::new(ManualClock::at(1_000)),
        )
    }

    #[tokio::test]
    async fn update_swaps_version_atomically() {
        let store = store();
        let before = store.snapshot().await;
        store
            .update("routing", "shadow_rate", json!(0.25))
            .await
            .expect("valid update");
        let after = store.snapshot().await;

        assert_eq!(before.version + 1, after.version);
        assert_eq!(before.config.routing.shadow_rate, 0.1);
        assert_eq!(after.config.routing.shadow_rate, 0.25);
    }

    #[tokio::test]
    async fn invalid_value_keeps_old_version_active() {
        let store = store();
        let err = store
            .update("routing", "shadow_rate", json!(1.5))
            .await
            .expect_err("out of range");
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.config.routing.shadow_rate, 0.1);
    }

    #[tokio::test]
    async fn non_runtime_key_is_rejected() {
        let store = store();
        let err = store
            .update("learning", "ewma_half_life", json!(10))
            .await
            .expect_err("requires restart");
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn version_log_records_old_and_new() {
        let store = store();
        store
            .update("budget", "max_retries", json!(4))
            .await
            .expect("valid");
        let history = store.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_value, json!(2));
        assert_eq!(history[0].new_value, json!(4));
    }

    #[tokio::test]
    async fn update_publishes_config_updated_event() {
        let bus = ControlBus::default();
        let store = ConfigStore::new(
            CoreConfig::default(),
            bus.clone(),
            Arc::new(ManualClock::at(0)),
        );
        let mut rx = bus.subscribe(crate::topics::Topics::CONFIG_UPDATED).await;
        store
            .update("scheduler", "base_exploration", json!(0.2))
            .await
            .expect("valid");
        let envelope = rx.recv().await.expect("event");
        match envelope.event {
            ControlEvent::ConfigUpdated { domain, key } => {
                assert_eq!(domain, "scheduler");
                assert_eq!(key, "base_exploration");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
