//! Provider descriptors: identity, capabilities, cost model, health.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Stable provider identifier, e.g. `"anthropic"` or `"openai"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Stream,
    Vision,
    Code,
    Cheap,
    Fast,
}

/// Per-1k-token pricing used for cost estimates and cheapest-first ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl CostModel {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Estimated cost of one exchange.
    pub fn estimate(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        f64::from(input_tokens) / 1_000.0 * self.input_per_1k
            + f64::from(output_tokens) / 1_000.0 * self.output_per_1k
    }

    /// Blended per-1k rate used for cheapest-first ordering.
    pub fn blended_per_1k(&self) -> f64 {
        (self.input_per_1k + self.output_per_1k) / 2.0
    }
}

/// Health machine states for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// One or two recent transient failures.
    Degraded,
    /// In cooldown after repeated transient failures; excluded from routing.
    Cooling,
    /// Permanent failure; excluded until an operator re-enables.
    Disabled,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Cooling => "cooling",
            Self::Disabled => "disabled",
        }
    }
}

/// Point-in-time provider snapshot handed to callers of the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub display_name: String,
    pub default_model: String,
    pub capabilities: BTreeSet<Capability>,
    pub cost_model: CostModel,
    pub health: HealthSnapshot,
    pub priority: i32,
}

impl Provider {
    pub fn supports(&self, required: &BTreeSet<Capability>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub available: bool,
    pub consecutive_failures: u32,
    pub cooldown_until_ms: Option<u64>,
}
