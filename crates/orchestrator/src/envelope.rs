//! Transparency envelope assembly. Pure: traces in, envelope out.

use domain::envelope::{
    Envelope, EnvelopeMeta, EnvelopeStatus, ExplorationMeta, PrimaryRef, ProviderRole,
    ProviderTrace, RoutingMeta, Totals, ValidationStatus,
};
use domain::plan::Plan;

/// Inputs accumulated during one plan execution.
#[derive(Debug, Default)]
pub struct EnvelopeParts {
    pub response: Option<String>,
    pub error_kind: Option<String>,
    pub traces: Vec<ProviderTrace>,
    pub consensus: Option<f64>,
    pub validation_status: Option<ValidationStatus>,
    pub wall_latency_ms: u64,
}

/// Build the envelope for a finished (or failed, or cancelled) plan.
///
/// Totals are wall-clock for the plan; cost is the sum over every contact,
/// shadow calls included. Degraded results carry a discounted confidence.
pub fn wrap(plan: &Plan, status: EnvelopeStatus, parts: EnvelopeParts) -> Envelope {
    let total_cost: f64 = parts.traces.iter().map(|t| t.cost_usd).sum();

    let primary = parts
        .traces
        .iter()
        .find(|t| t.role == ProviderRole::Primary)
        .map(|t| PrimaryRef {
            provider: t.provider.clone(),
            model: t.model.clone(),
        })
        .or_else(|| {
            plan.primary_provider().map(|(provider, model)| PrimaryRef {
                provider: provider.to_string(),
                model: model.to_string(),
            })
        });

    let confidence = match status {
        EnvelopeStatus::Completed => plan.confidence(),
        EnvelopeStatus::Degraded => plan.confidence() * 0.5,
        EnvelopeStatus::Cancelled | EnvelopeStatus::Failed => 0.0,
    };

    Envelope {
        response: parts.response,
        error_kind: parts.error_kind,
        status,
        meta: EnvelopeMeta {
            providers: parts.traces,
            primary,
            routing: RoutingMeta {
                reasoning: plan.reasoning().to_string(),
                task_class: plan.task_class().to_string(),
                execution_mode: plan.execution_mode(),
                exploration: ExplorationMeta {
                    epsilon: plan.epsilon(),
                    explored: plan.explored(),
                },
            },
            confidence,
            consensus: parts.consensus,
            totals: Totals {
                cost_usd: total_cost,
                latency_ms: parts.wall_latency_ms,
            },
            validation_status: parts.validation_status,
        },
    }
}
