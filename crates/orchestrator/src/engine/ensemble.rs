//! Ensemble execution: concurrent fan-out under a shared deadline, a
//! response quorum, and optional consensus synthesis.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use common::config::BudgetConfig;
use domain::contracts::{Sink, StageSummary};
use domain::envelope::{EnvelopeStatus, ProviderRole};
use domain::plan::Plan;
use domain::provider::ProviderId;
use domain::request::Request;

use super::{CallFailure, CallSpec, CallSuccess, ExecutionEngine};
use crate::envelope::EnvelopeParts;

const SYNTHESIS_SYSTEM: &str = "You are the consensus synthesizer. Several assistant candidates \
answered the same request. Merge them into one best answer: resolve disagreements by majority \
and evidence, and do not mention the candidates or the synthesis process.";

/// Deterministic synthesizer input: candidates ordered by provider id.
fn synthesis_prompt(request: &Request, candidates: &[(ProviderId, String)]) -> String {
    let mut prompt = format!("Request:\n{}\n\nCandidate answers:\n", request.prompt);
    for (provider, content) in candidates {
        prompt.push_str(&format!("--- candidate from {provider} ---\n{content}\n"));
    }
    prompt
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run_ensemble(
        self: &Arc<Self>,
        plan: &Plan,
        request: &Request,
        sink: &Arc<dyn Sink>,
        token: &CancellationToken,
        budget: &BudgetConfig,
        attempt_seq: &Arc<AtomicU32>,
        providers: Vec<(ProviderId, String)>,
        synthesize: bool,
        min_responses: usize,
        timeout_ms: u64,
    ) -> (EnvelopeStatus, EnvelopeParts) {
        let mut parts = EnvelopeParts::default();
        let member_count = providers.len();
        let (tx, mut rx) = mpsc::channel::<Result<CallSuccess, CallFailure>>(member_count);
        let child_tokens: Vec<CancellationToken> =
            (0..member_count).map(|_| token.child_token()).collect();

        let mut handles = Vec::with_capacity(member_count);
        for (index, (provider, model)) in providers.iter().cloned().enumerate() {
            let engine = Arc::clone(self);
            let tx = tx.clone();
            let child = child_tokens[index].clone();
            let seq = Arc::clone(attempt_seq);
            let spec = CallSpec {
                plan_id: plan.id(),
                bucket: plan.task_class(),
                provider,
                model,
                prompt: request.prompt.clone(),
                system: None,
                history: request.history.clone(),
                role: ProviderRole::Primary,
                timeout: Duration::from_millis(budget.call_timeout_ms.min(timeout_ms)),
                record_success: true,
            };
            handles.push(tokio::spawn(async move {
                let result = engine.call_provider(spec, &child, None, &seq).await;
                let _ = tx.send(result).await;
            }));
        }
        drop(tx);

        let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(deadline);

        let mut successes: Vec<CallSuccess> = Vec::new();
        let mut failures: Vec<CallFailure> = Vec::new();
        let mut cancelled = false;

        loop {
            tokio::select! {
                _ = token.cancelled() => { cancelled = true; break; }
                _ = &mut deadline => {
                    debug!(responded = successes.len(), "ensemble deadline elapsed");
                    break;
                }
                maybe = rx.recv() => match maybe {
                    Some(Ok(success)) => {
                        successes.push(success);
                        if successes.len() >= min_responses {
                            // Quorum met: stop waiting and reclaim stragglers.
                            break;
                        }
                    }
                    Some(Err(failure)) => {
                        failures.push(failure);
                        if successes.len() + failures.len() == member_count {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        // Cancel whatever is still in flight, then wait for every member to
        // finish recording its outcome before assembling the envelope.
        for child in &child_tokens {
            child.cancel();
        }
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "ensemble member task panicked");
            }
        }
        while let Ok(result) = rx.try_recv() {
            match result {
                Ok(success) => successes.push(success),
                Err(failure) => failures.push(failure),
            }
        }

        if cancelled {
            parts.traces = collect_traces(successes, failures, None);
            return (EnvelopeStatus::Cancelled, parts);
        }

        let responders = successes.len();
        if responders < min_responses {
            warn!(responders, required = min_responses, "ensemble under quorum");
            parts.traces = collect_traces(successes, failures, None);
            parts.error_kind = Some("ensemble_under_quorum".to_string());
            return (EnvelopeStatus::Failed, parts);
        }

        // Deterministic candidate order regardless of completion order.
        let mut candidates: Vec<(ProviderId, String, CallSuccess)> = successes
            .into_iter()
            .map(|s| {
                (
                    ProviderId::new(&s.trace.provider),
                    s.reply.content.clone(),
                    s,
                )
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let (response, responder_trace) = if synthesize {
            let inputs: Vec<(ProviderId, String)> = candidates
                .iter()
                .map(|(id, content, _)| (id.clone(), content.clone()))
                .collect();
            let synthesizer = match self.registry.cheapest_chat().await {
                Some(provider) => (provider.id, provider.default_model),
                // Quorum guarantees at least one responder to reuse.
                None => (candidates[0].0.clone(), candidates[0].2.trace.model.clone()),
            };
            let spec = CallSpec {
                plan_id: plan.id(),
                bucket: plan.task_class(),
                provider: synthesizer.0,
                model: synthesizer.1,
                prompt: synthesis_prompt(request, &inputs),
                system: Some(SYNTHESIS_SYSTEM.to_string()),
                history: Vec::new(),
                role: ProviderRole::Synthesizer,
                timeout: Duration::from_millis(budget.call_timeout_ms),
                record_success: true,
            };
            match self.call_provider(spec, token, None, attempt_seq).await {
                Ok(success) => (success.reply.content.clone(), Some(success)),
                Err(failure) => {
                    // Degrade to the best raw candidate rather than failing.
                    warn!("synthesizer failed; returning best raw candidate");
                    failures.push(failure);
                    (self.best_candidate(plan, &candidates).await, None)
                }
            }
        } else {
            (self.best_candidate(plan, &candidates).await, None)
        };

        if sink.wants_stream() {
            sink.on_chunk(&response).await;
        }
        let summary_provider = responder_trace
            .as_ref()
            .map(|s| s.trace.provider.clone())
            .unwrap_or_else(|| candidates[0].0.to_string());
        let consensus = synthesize.then(|| responders as f64 / member_count as f64);

        sink.on_stage_complete(StageSummary {
            stage: "ensemble".into(),
            provider: summary_provider,
            latency_ms: responder_trace.as_ref().map(|s| s.trace.latency_ms).unwrap_or(0),
            score: consensus,
        })
        .await;

        let member_successes: Vec<CallSuccess> =
            candidates.into_iter().map(|(_, _, s)| s).collect();
        parts.traces = collect_traces(member_successes, failures, responder_trace);
        parts.response = Some(response);
        parts.consensus = consensus;
        (EnvelopeStatus::Completed, parts)
    }

    /// Highest-confidence raw answer, tie-broken by lowest latency.
    async fn best_candidate(
        &self,
        plan: &Plan,
        candidates: &[(ProviderId, String, CallSuccess)],
    ) -> String {
        let mut best: Option<(f64, u64, &String)> = None;
        for (provider, content, success) in candidates {
            let confidence = self
                .ledger
                .stats(provider, plan.task_class())
                .await
                .map(|p| p.success_rate())
                .unwrap_or(0.0);
            let latency = success.trace.latency_ms;
            let better = match &best {
                None => true,
                Some((c, l, _)) => {
                    confidence > *c || (confidence == *c && latency < *l)
                }
            };
            if better {
                best = Some((confidence, latency, content));
            }
        }
        best.map(|(_, _, content)| content.clone()).unwrap_or_default()
    }
}

fn collect_traces(
    successes: Vec<CallSuccess>,
    failures: Vec<CallFailure>,
    synthesizer: Option<CallSuccess>,
) -> Vec<domain::envelope::ProviderTrace> {
    let mut traces: Vec<_> = successes.into_iter().map(|s| s.trace).collect();
    traces.extend(failures.into_iter().map(|f| f.trace));
    if let Some(synth) = synthesizer {
        traces.push(synth.trace);
    }
    traces
}
