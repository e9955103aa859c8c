//! Staged validation loop: generate → review → test (→ optimize), with a
//! quality gate and provider re-routing on weak stages.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use common::config::BudgetConfig;
use domain::contracts::{Sink, StageSummary};
use domain::envelope::{EnvelopeStatus, ProviderRole};
use domain::outcome::Outcome;
use domain::plan::{Plan, StageAssignment, StageKind};
use domain::provider::ProviderId;
use domain::request::Request;

use super::{CallError, CallSpec, ExecutionEngine};
use crate::envelope::EnvelopeParts;

fn stage_system(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Generate => {
            "You are the primary assistant. Produce the best possible answer to the request."
        }
        StageKind::Review => {
            "You are a careful reviewer. Inspect the draft answer for issues, fix what you find, \
             and return the corrected answer in full."
        }
        StageKind::Test => {
            "You are a tester. Probe the draft answer for errors and edge cases, and return the \
             answer revised so it passes your checks."
        }
        StageKind::Optimize => {
            "You are an optimizer. Tighten and polish the answer without changing its meaning, \
             and return the final answer."
        }
    }
}

fn stage_prompt(kind: StageKind, request: &Request, draft: Option<&str>) -> String {
    match (kind, draft) {
        (StageKind::Generate, _) | (_, None) => request.prompt.clone(),
        (_, Some(draft)) => format!("{}\n\nCurrent draft:\n{draft}", request.prompt),
    }
}

fn role_for(kind: StageKind) -> ProviderRole {
    match kind {
        StageKind::Generate => ProviderRole::Primary,
        StageKind::Review => ProviderRole::Reviewer,
        StageKind::Test => ProviderRole::Tester,
        StageKind::Optimize => ProviderRole::Optimizer,
    }
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run_validation(
        self: &Arc<Self>,
        plan: &Plan,
        request: &Request,
        sink: &Arc<dyn Sink>,
        token: &CancellationToken,
        budget: &BudgetConfig,
        attempt_seq: &Arc<AtomicU32>,
        stages: Vec<StageAssignment>,
        min_confidence: f64,
        max_retries: u32,
    ) -> (EnvelopeStatus, EnvelopeParts) {
        // Total budget: sum of stage timeouts plus slack. Exceeding it
        // cancels the cascade; the loop then resolves as cancelled.
        let total = Duration::from_millis(
            budget.call_timeout_ms * stages.len() as u64 + budget.validation_slack_ms,
        );
        let deadline = tokio::time::sleep(total);
        tokio::pin!(deadline);
        let work = self.validation_loop(
            plan,
            request,
            sink,
            token,
            budget,
            attempt_seq,
            stages,
            min_confidence,
            max_retries,
        );
        tokio::pin!(work);

        tokio::select! {
            result = &mut work => result,
            _ = &mut deadline => {
                warn!(plan = %plan.id(), "validation loop exceeded its total budget");
                token.cancel();
                work.await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn validation_loop(
        &self,
        plan: &Plan,
        request: &Request,
        sink: &Arc<dyn Sink>,
        token: &CancellationToken,
        budget: &BudgetConfig,
        attempt_seq: &Arc<AtomicU32>,
        stages: Vec<StageAssignment>,
        min_confidence: f64,
        max_retries: u32,
    ) -> (EnvelopeStatus, EnvelopeParts) {
        let mut parts = EnvelopeParts::default();
        let mut current: Option<String> = None;
        let mut all_passed = true;
        let mut hard_failed = false;

        'stages: for assignment in &stages {
            let kind = assignment.stage;
            let mut provider = assignment.provider.clone();
            let mut model = assignment.model.clone();
            let mut tried: Vec<ProviderId> = Vec::new();
            let mut best: Option<(f64, String)> = None;
            let mut passed = false;

            for retry in 0..=max_retries {
                tried.push(provider.clone());
                let prompt = stage_prompt(kind, request, current.as_deref());
                let spec = CallSpec {
                    plan_id: plan.id(),
                    bucket: plan.task_class(),
                    provider: provider.clone(),
                    model: model.clone(),
                    prompt: prompt.clone(),
                    system: Some(stage_system(kind).to_string()),
                    history: request.history.clone(),
                    role: role_for(kind),
                    timeout: Duration::from_millis(budget.call_timeout_ms),
                    record_success: false,
                };

                match self.call_provider(spec, token, None, attempt_seq).await {
                    Ok(success) => {
                        let content = success.reply.content.clone();
                        let score = self.scorer.score(kind, &prompt, &content).await;
                        let outcome = Outcome::success(
                            plan.id(),
                            provider.clone(),
                            plan.task_class(),
                            success.trace.latency_ms,
                            success.trace.cost_usd,
                            score,
                            self.clock.now_ms(),
                        )
                        .with_attempt(success.attempt);
                        if let Err(err) = self.ledger.record(outcome).await {
                            warn!(error = %err, "failed to record stage outcome");
                        }
                        sink.on_stage_complete(StageSummary {
                            stage: kind.as_str().to_string(),
                            provider: provider.to_string(),
                            latency_ms: success.trace.latency_ms,
                            score: Some(score),
                        })
                        .await;
                        parts.traces.push(success.trace);

                        if score >= min_confidence {
                            debug!(stage = kind.as_str(), score, "stage passed");
                            current = Some(content);
                            passed = true;
                            break;
                        }
                        debug!(stage = kind.as_str(), score, "stage below quality gate");
                        if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                            best = Some((score, content));
                        }
                    }
                    Err(failure) => {
                        parts.traces.push(failure.trace);
                        match failure.error {
                            CallError::Cancelled => {
                                return (EnvelopeStatus::Cancelled, parts);
                            }
                            CallError::Provider(error) if !error.retriable => {
                                warn!(stage = kind.as_str(), "stage hard-failed");
                                all_passed = false;
                                hard_failed = true;
                                break 'stages;
                            }
                            CallError::Provider(_) => {}
                        }
                    }
                }

                // Weak score or transient failure: swap in the next-best
                // provider for the retry when one exists.
                if retry < max_retries {
                    if let Some((next_provider, next_model)) = self
                        .router
                        .next_best(plan.task_class(), request.task_type, &tried)
                        .await
                    {
                        debug!(
                            stage = kind.as_str(),
                            from = %provider,
                            to = %next_provider,
                            "re-routing stage retry"
                        );
                        provider = next_provider;
                        model = next_model;
                    }
                }
            }

            if !passed {
                all_passed = false;
                if let Some((_, content)) = best {
                    current = Some(content);
                }
                break 'stages;
            }
        }

        if all_passed {
            parts.validation_status = Some(domain::envelope::ValidationStatus::Passed);
            if let Some(response) = &current {
                if sink.wants_stream() {
                    sink.on_chunk(response).await;
                }
            }
            parts.response = current;
            (EnvelopeStatus::Completed, parts)
        } else if current.is_some() {
            // Retries exhausted (or a later stage hard-failed) but usable
            // output exists: degrade rather than fail.
            parts.validation_status = Some(domain::envelope::ValidationStatus::Degraded);
            if hard_failed {
                parts.error_kind = Some("validation_failed".to_string());
            }
            parts.response = current;
            (EnvelopeStatus::Degraded, parts)
        } else {
            parts.error_kind = Some("validation_failed".to_string());
            (EnvelopeStatus::Failed, parts)
        }
    }
}
