//! Execution engine: interprets plans and owns cancellation, timeouts, and
//! partial-result semantics.
//!
//! Every provider attempt flows through [`ExecutionEngine::call_provider`],
//! which reports health to the registry and appends exactly one outcome to
//! the ledger. Retries stay local to the plan being executed; nothing
//! retries across requests.

pub mod backoff;
mod ensemble;
mod single;
mod validation;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::clock::{Clock, RngSource};
use common::config::BudgetConfig;
use common::errors::{CoreError, OutcomeErrorKind, ProviderError};
use common::event_bus::ControlBus;
use common::events::ControlEvent;
use domain::contracts::{AdapterCall, AdapterReply, Sink};
use domain::envelope::{Envelope, EnvelopeStatus, ProviderRole, ProviderTrace};
use domain::features::FeatureBucket;
use domain::outcome::Outcome;
use domain::plan::{Plan, PlanShape};
use domain::provider::ProviderId;
use domain::request::{ChatTurn, Request};
use domain::scheduler::SchedulerMode;
use feedback::FeedbackLedger;
use llm::{HealthEvent, ProviderRegistry};
use router::RoutingPolicy;

use crate::envelope::{wrap, EnvelopeParts};

pub(crate) enum CallError {
    Cancelled,
    Provider(ProviderError),
}

pub(crate) struct CallSuccess {
    pub reply: AdapterReply,
    pub trace: ProviderTrace,
    /// Attempt number assigned to this call within its plan.
    pub attempt: u32,
}

pub(crate) struct CallFailure {
    pub error: CallError,
    pub trace: ProviderTrace,
}

/// One provider attempt, fully described.
pub(crate) struct CallSpec {
    pub plan_id: Uuid,
    pub bucket: FeatureBucket,
    pub provider: ProviderId,
    pub model: String,
    pub prompt: String,
    pub system: Option<String>,
    pub history: Vec<ChatTurn>,
    pub role: ProviderRole,
    pub timeout: Duration,
    /// When false the caller records the success outcome itself (the
    /// validation loop scores first). Failures are always recorded here.
    pub record_success: bool,
}

pub struct ExecutionEngine {
    registry: Arc<ProviderRegistry>,
    ledger: Arc<FeedbackLedger>,
    router: Arc<RoutingPolicy>,
    scorer: Arc<dyn domain::contracts::Scorer>,
    bus: ControlBus,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RngSource>,
    budget: RwLock<BudgetConfig>,
    scheduler_state: watch::Receiver<domain::scheduler::SchedulerState>,
    active: StdMutex<HashMap<Uuid, CancellationToken>>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        ledger: Arc<FeedbackLedger>,
        router: Arc<RoutingPolicy>,
        scorer: Arc<dyn domain::contracts::Scorer>,
        bus: ControlBus,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RngSource>,
        budget: BudgetConfig,
        scheduler_state: watch::Receiver<domain::scheduler::SchedulerState>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            ledger,
            router,
            scorer,
            bus,
            clock,
            rng,
            budget: RwLock::new(budget),
            scheduler_state,
            active: StdMutex::new(HashMap::new()),
        })
    }

    pub async fn update_budget(&self, budget: BudgetConfig) {
        *self.budget.write().await = budget;
    }

    /// Cooperatively abort an in-flight plan. Returns false when the plan
    /// is unknown or already finished.
    pub fn cancel(&self, plan_id: Uuid) -> bool {
        let active = self.active.lock().expect("active lock poisoned");
        match active.get(&plan_id) {
            Some(token) => {
                info!(plan = %plan_id, "cancelling plan");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute one plan to completion. An accepted plan always resolves to
    /// exactly one envelope; failures are carried inside it.
    pub async fn execute(
        self: &Arc<Self>,
        plan: Plan,
        request: &Request,
        sink: Arc<dyn Sink>,
    ) -> Result<Envelope, CoreError> {
        if self.scheduler_state.borrow().mode == SchedulerMode::Stopped {
            return Err(CoreError::SchedulerLocked);
        }

        let budget = self.budget.read().await.clone();
        self.ledger.register_plan(plan.id()).await;
        self.bus
            .publish(ControlEvent::PlanCreated {
                plan_id: plan.id(),
                execution_mode: plan.execution_mode().as_str().to_string(),
                primary_provider: plan.primary_provider().map(|(p, _)| p.to_string()),
            })
            .await;

        let token = CancellationToken::new();
        self.active
            .lock()
            .expect("active lock poisoned")
            .insert(plan.id(), token.clone());
        let attempt_seq = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        // Shadow challenger runs in parallel and is never surfaced.
        let shadow_handle = plan.shadow_challenger().cloned().map(|(provider, model)| {
            let engine = Arc::clone(self);
            let spec = CallSpec {
                plan_id: plan.id(),
                bucket: plan.task_class(),
                provider,
                model,
                prompt: request.prompt.clone(),
                system: None,
                history: request.history.clone(),
                role: ProviderRole::Shadow,
                timeout: Duration::from_millis(budget.call_timeout_ms),
                record_success: true,
            };
            let token = token.child_token();
            let seq = Arc::clone(&attempt_seq);
            tokio::spawn(async move { engine.call_provider(spec, &token, None, &seq).await })
        });

        let (status, mut parts) = match plan.shape().clone() {
            PlanShape::Single { provider, model } => {
                self.run_single(&plan, request, &sink, &token, &budget, &attempt_seq, provider, model)
                    .await
            }
            PlanShape::Ensemble {
                providers,
                synthesize,
                min_responses,
                timeout_ms,
            } => {
                self.run_ensemble(
                    &plan,
                    request,
                    &sink,
                    &token,
                    &budget,
                    &attempt_seq,
                    providers,
                    synthesize,
                    min_responses,
                    timeout_ms,
                )
                .await
            }
            PlanShape::ValidationLoop {
                stages,
                min_confidence,
                max_retries,
                skip_optimize: _,
            } => {
                self.run_validation(
                    &plan,
                    request,
                    &sink,
                    &token,
                    &budget,
                    &attempt_seq,
                    stages,
                    min_confidence,
                    max_retries,
                )
                .await
            }
        };

        // The envelope is emitted strictly after every spawned call has
        // resolved; the shadow is bounded by its own call timeout.
        if let Some(handle) = shadow_handle {
            match handle.await {
                Ok(result) => {
                    let (shadow_trace, shadow_ok) = match result {
                        Ok(success) => (success.trace, true),
                        Err(failure) => (failure.trace, false),
                    };
                    let primary = parts
                        .traces
                        .iter()
                        .find(|t| t.role == ProviderRole::Primary);
                    let challenger_won = shadow_ok
                        && primary
                            .map(|p| !p.success || shadow_trace.latency_ms < p.latency_ms)
                            .unwrap_or(true);
                    debug!(challenger_won, "shadow experiment resolved");
                    self.router.note_shadow_result(challenger_won);
                    parts.traces.push(shadow_trace);
                }
                Err(err) => warn!(error = %err, "shadow task panicked"),
            }
        }

        parts.wall_latency_ms = started.elapsed().as_millis() as u64;
        let envelope = wrap(&plan, status, parts);

        self.active
            .lock()
            .expect("active lock poisoned")
            .remove(&plan.id());
        self.bus
            .publish(ControlEvent::PlanCompleted {
                plan_id: plan.id(),
                status: status_label(status).to_string(),
            })
            .await;
        sink.on_done(&envelope).await;
        Ok(envelope)
    }

    /// One timed, cancellable provider call with health reporting and
    /// outcome recording.
    pub(crate) async fn call_provider(
        &self,
        spec: CallSpec,
        token: &CancellationToken,
        stream_to: Option<&Arc<dyn Sink>>,
        attempt_seq: &Arc<AtomicU32>,
    ) -> Result<CallSuccess, CallFailure> {
        let attempt = attempt_seq.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let trace = |success: bool, latency_ms: u64, cost_usd: f64| ProviderTrace {
            provider: spec.provider.to_string(),
            model: spec.model.clone(),
            role: spec.role,
            latency_ms,
            cost_usd,
            success,
        };

        let Some(adapter) = self.registry.adapter(&spec.provider).await else {
            let error = ProviderError::bad_input(format!("unknown provider {}", spec.provider));
            self.record_failure(&spec, attempt, 0, &error).await;
            return Err(CallFailure {
                error: CallError::Provider(error),
                trace: trace(false, 0, 0.0),
            });
        };
        let cost_model = self
            .registry
            .get(&spec.provider)
            .await
            .map(|p| p.cost_model);

        let call = AdapterCall {
            prompt: spec.prompt.clone(),
            system: spec.system.clone(),
            history: spec.history.clone(),
            model: spec.model.clone(),
            max_tokens: None,
        };

        let result = self.drive_call(adapter, call, spec.timeout, token, stream_to).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(reply) => {
                let cost_usd = cost_model
                    .map(|m| m.estimate(reply.usage.input_tokens, reply.usage.output_tokens))
                    .unwrap_or(0.0);
                self.registry.report(&spec.provider, HealthEvent::Success).await;
                if spec.record_success {
                    let outcome = Outcome::success(
                        spec.plan_id,
                        spec.provider.clone(),
                        spec.bucket,
                        latency_ms,
                        cost_usd,
                        1.0,
                        self.clock.now_ms(),
                    )
                    .with_attempt(attempt);
                    if let Err(err) = self.ledger.record(outcome).await {
                        warn!(error = %err, "failed to record outcome");
                    }
                }
                Ok(CallSuccess {
                    reply,
                    trace: trace(true, latency_ms, cost_usd),
                    attempt,
                })
            }
            Err(error) => {
                // A cooperative cancellation is not a provider fault; it
                // keeps its own outcome label.
                let (event, kind) = match &error {
                    CallError::Cancelled => (HealthEvent::TransientFail, OutcomeErrorKind::Cancelled),
                    CallError::Provider(e) if e.retriable => {
                        (HealthEvent::TransientFail, e.kind.into())
                    }
                    CallError::Provider(e) => (HealthEvent::PermanentFail, e.kind.into()),
                };
                self.registry.report(&spec.provider, event).await;
                let outcome = Outcome::failure(
                    spec.plan_id,
                    spec.provider.clone(),
                    spec.bucket,
                    latency_ms,
                    kind,
                    self.clock.now_ms(),
                )
                .with_attempt(attempt);
                if let Err(err) = self.ledger.record(outcome).await {
                    warn!(error = %err, "failed to record outcome");
                }
                Err(CallFailure {
                    error,
                    trace: trace(false, latency_ms, 0.0),
                })
            }
        }
    }

    async fn record_failure(
        &self,
        spec: &CallSpec,
        attempt: u32,
        latency_ms: u64,
        error: &ProviderError,
    ) {
        let outcome = Outcome::failure(
            spec.plan_id,
            spec.provider.clone(),
            spec.bucket,
            latency_ms,
            error.kind.into(),
            self.clock.now_ms(),
        )
        .with_attempt(attempt);
        if let Err(err) = self.ledger.record(outcome).await {
            warn!(error = %err, "failed to record outcome");
        }
    }

    /// Await the adapter under a deadline and a cancellation token,
    /// forwarding chunks in order when streaming.
    async fn drive_call(
        &self,
        adapter: Arc<dyn domain::contracts::ProviderAdapter>,
        call: AdapterCall,
        timeout: Duration,
        token: &CancellationToken,
        stream_to: Option<&Arc<dyn Sink>>,
    ) -> Result<AdapterReply, CallError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        match stream_to {
            None => {
                let fut = adapter.generate(call);
                tokio::pin!(fut);
                tokio::select! {
                    _ = token.cancelled() => Err(CallError::Cancelled),
                    _ = &mut deadline => Err(CallError::Provider(ProviderError::network("provider call timed out"))),
                    result = &mut fut => result.map_err(CallError::Provider),
                }
            }
            Some(sink) => {
                let (tx, mut rx) = mpsc::channel::<String>(32);
                let fut = adapter.stream(call, tx);
                tokio::pin!(fut);
                let mut chunks_open = true;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return Err(CallError::Cancelled),
                        _ = &mut deadline => return Err(CallError::Provider(ProviderError::network("provider call timed out"))),
                        maybe = rx.recv(), if chunks_open => match maybe {
                            Some(chunk) => sink.on_chunk(&chunk).await,
                            None => chunks_open = false,
                        },
                        result = &mut fut => {
                            // Flush whatever is still buffered, in order.
                            while let Ok(chunk) = rx.try_recv() {
                                sink.on_chunk(&chunk).await;
                            }
                            return result.map_err(CallError::Provider);
                        }
                    }
                }
            }
        }
    }
}

pub(crate) fn status_label(status: EnvelopeStatus) -> &'static str {
    match status {
        EnvelopeStatus::Completed => "completed",
        EnvelopeStatus::Degraded => "degraded",
        EnvelopeStatus::Cancelled => "cancelled",
        EnvelopeStatus::Failed => "failed",
    }
}
