//! Transparency envelope: the final returned value, pairing the response
//! with provenance for every provider touched. The `meta` shape below is
//! the wire contract consumed by dashboards and the chat surface.

use serde::{Deserialize, Serialize};

use crate::plan::ExecutionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRole {
    Primary,
    Reviewer,
    Tester,
    Optimizer,
    Synthesizer,
    Shadow,
}

/// One provider contact, role-tagged. Shadow calls appear here even though
/// their output is never surfaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTrace {
    pub provider: String,
    pub model: String,
    pub role: ProviderRole,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryRef {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationMeta {
    pub epsilon: f64,
    pub explored: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMeta {
    pub reasoning: String,
    pub task_class: String,
    pub execution_mode: ExecutionMode,
    pub exploration: ExplorationMeta,
}

/// Aggregates are wall-clock for the whole plan, not a per-provider sum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub cost_usd: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Completed,
    Degraded,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    pub providers: Vec<ProviderTrace>,
    pub primary: Option<PrimaryRef>,
    pub routing: RoutingMeta,
    pub confidence: f64,
    pub consensus: Option<f64>,
    pub totals: Totals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<ValidationStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub status: EnvelopeStatus,
    pub meta: EnvelopeMeta,
}

impl Envelope {
    /// Presentation-only one-line cost breakdown.
    pub fn cost_breakdown(&self) -> String {
        let parts: Vec<String> = self
            .meta
            .providers
            .iter()
            .map(|t| format!("{}: ${:.4}", t.provider, t.cost_usd))
            .collect();
        format!(
            "{} (total ${:.4})",
            parts.join(", "),
            self.meta.totals.cost_usd
        )
    }

    /// Presentation-only badge summarising how the answer was produced.
    pub fn badge(&self) -> String {
        match self.meta.routing.execution_mode {
            ExecutionMode::Single => format!(
                "{} · confidence {:.2}",
                self.meta
                    .primary
                    .as_ref()
                    .map(|p| p.provider.as_str())
                    .unwrap_or("unknown"),
                self.meta.confidence
            ),
            ExecutionMode::Ensemble => format!(
                "ensemble of {} · consensus {}",
                self.meta
                    .providers
                    .iter()
                    .filter(|t| t.role != ProviderRole::Shadow)
                    .count(),
                self.meta
                    .consensus
                    .map(|c| format!("{c:.2}"))
                    .unwrap_or_else(|| "n/a".into())
            ),
            ExecutionMode::ValidationLoop => format!(
                "validated · {}",
                match self.meta.validation_status {
                    Some(ValidationStatus::Passed) => "passed",
                    Some(ValidationStatus::Degraded) => "degraded",
                    None => "incomplete",
                }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope {
            response: Some("hi".into()),
            error_kind: None,
            status: EnvelopeStatus::Completed,
            meta: EnvelopeMeta {
                providers: vec![ProviderTrace {
                    provider: "p1".into(),
                    model: "m".into(),
                    role: ProviderRole::Primary,
                    latency_ms: 120,
                    cost_usd: 0.0042,
                    success: true,
                }],
                primary: Some(PrimaryRef {
                    provider: "p1".into(),
                    model: "m".into(),
                }),
                routing: RoutingMeta {
                    reasoning: "r".into(),
                    task_class: "general/simple".into(),
                    execution_mode: ExecutionMode::Single,
                    exploration: ExplorationMeta {
                        epsilon: 0.1,
                        explored: false,
                    },
                },
                confidence: 0.9,
                consensus: None,
                totals: Totals {
                    cost_usd: 0.0042,
                    latency_ms: 120,
                },
                validation_status: None,
            },
        }
    }

    #[test]
    fn meta_serializes_camel_case() {
        let json = serde_json::to_value(&envelope()).expect("serialize");
        let meta = &json["meta"];
        assert!(meta["providers"][0]["latencyMs"].is_number());
        assert!(meta["providers"][0]["costUsd"].is_number());
        assert_eq!(meta["routing"]["executionMode"], "single");
        assert!(meta["totals"]["costUsd"].is_number());
        assert!(meta.get("validationStatus").is_none());
    }

    #[test]
    fn badge_mentions_primary_for_single() {
        assert!(envelope().badge().contains("p1"));
    }
}
