//! Single-provider execution with local retry and backoff.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use common::config::BudgetConfig;
use domain::contracts::{Sink, StageSummary};
use domain::envelope::{EnvelopeStatus, ProviderRole};
use domain::plan::Plan;
use domain::provider::ProviderId;
use domain::request::Request;

use super::backoff::BackoffPolicy;
use super::{CallError, CallSpec, ExecutionEngine};
use crate::envelope::EnvelopeParts;

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run_single(
        &self,
        plan: &Plan,
        request: &Request,
        sink: &Arc<dyn Sink>,
        token: &CancellationToken,
        budget: &BudgetConfig,
        attempt_seq: &Arc<AtomicU32>,
        provider: ProviderId,
        model: String,
    ) -> (EnvelopeStatus, EnvelopeParts) {
        let mut parts = EnvelopeParts::default();
        let backoff = BackoffPolicy::new(
            Duration::from_millis(budget.backoff_base_ms),
            Duration::from_millis(budget.backoff_cap_ms),
        );
        let stream_to = sink.wants_stream().then_some(sink);

        for retry in 0..=budget.max_retries {
            let spec = CallSpec {
                plan_id: plan.id(),
                bucket: plan.task_class(),
                provider: provider.clone(),
                model: model.clone(),
                prompt: request.prompt.clone(),
                system: None,
                history: request.history.clone(),
                role: ProviderRole::Primary,
                timeout: Duration::from_millis(budget.call_timeout_ms),
                record_success: true,
            };

            match self.call_provider(spec, token, stream_to, attempt_seq).await {
                Ok(success) => {
                    sink.on_stage_complete(StageSummary {
                        stage: "single".into(),
                        provider: provider.to_string(),
                        latency_ms: success.trace.latency_ms,
                        score: None,
                    })
                    .await;
                    parts.traces.push(success.trace);
                    parts.response = Some(success.reply.content);
                    return (EnvelopeStatus::Completed, parts);
                }
                Err(failure) => {
                    parts.traces.push(failure.trace);
                    match failure.error {
                        CallError::Cancelled => return (EnvelopeStatus::Cancelled, parts),
                        CallError::Provider(error) => {
                            if error.retriable && retry < budget.max_retries {
                                let delay = backoff.delay_for(retry, &self.rng);
                                debug!(
                                    provider = %provider,
                                    retry = retry + 1,
                                    delay_ms = delay.as_millis() as u64,
                                    "retrying after transient provider error"
                                );
                                tokio::select! {
                                    _ = token.cancelled() => return (EnvelopeStatus::Cancelled, parts),
                                    _ = tokio::time::sleep(delay) => {}
                                }
                                continue;
                            }
                            parts.error_kind = Some(error.kind.as_str().to_string());
                            return (EnvelopeStatus::Failed, parts);
                        }
                    }
                }
            }
        }

        // Loop always returns; reaching here means max_retries wrapped.
        (EnvelopeStatus::Failed, parts)
    }
}
