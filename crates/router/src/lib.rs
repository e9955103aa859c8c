//! Routing policy: epsilon-greedy selection over learned q-values.
//!
//! `plan()` is pure over a point-in-time snapshot of provider profiles and
//! scheduler state: it reads, decides, and returns an immutable plan. It
//! never calls providers and never blocks on persistence.

pub mod features;

pub use features::extract;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use common::clock::{Clock, RngSource};
use common::config::{BudgetConfig, RoutingConfig};
use common::errors::CoreError;
use domain::features::{Complexity, FeatureBucket, Features};
use domain::plan::{Plan, PlanMeta, StageAssignment, StageKind};
use domain::provider::{Capability, Provider, ProviderId};
use domain::request::{BudgetTier, Mode, Request, TaskType};
use domain::scheduler::SchedulerState;
use feedback::{FeedbackLedger, ProviderProfile};
use llm::ProviderRegistry;

/// Stage score floor for validation loops; stages scoring below it retry
/// with the next-best provider.
const DEFAULT_MIN_CONFIDENCE: f64 = 0.8;
const DEFAULT_STAGE_RETRIES: u32 = 2;
const ENSEMBLE_MIN_RESPONSES: usize = 2;
const ENSEMBLE_TRIGGER_KEYWORDS: &[&str] = &["brainstorm", "compare"];

#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    pub plans_total: u64,
    pub explored_total: u64,
    pub single_plans: u64,
    pub ensemble_plans: u64,
    pub validation_plans: u64,
    pub fallback_plans: u64,
    pub shadow_attached: u64,
    pub shadow_wins: u64,
    pub shadow_losses: u64,
}

impl RouterStats {
    pub fn shadow_win_rate(&self) -> Option<f64> {
        let total = self.shadow_wins + self.shadow_losses;
        (total > 0).then(|| self.shadow_wins as f64 / total as f64)
    }
}

#[derive(Clone)]
struct Candidate {
    provider: Provider,
    profile: ProviderProfile,
}

pub struct RoutingPolicy {
    registry: Arc<ProviderRegistry>,
    ledger: Arc<FeedbackLedger>,
    routing: RwLock<RoutingConfig>,
    budget: RwLock<BudgetConfig>,
    scheduler_state: watch::Receiver<SchedulerState>,
    rng: Arc<dyn RngSource>,
    clock: Arc<dyn Clock>,
    stats: StdMutex<RouterStats>,
}

impl RoutingPolicy {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        ledger: Arc<FeedbackLedger>,
        routing: RoutingConfig,
        budget: BudgetConfig,
        scheduler_state: watch::Receiver<SchedulerState>,
        rng: Arc<dyn RngSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            ledger,
            routing: RwLock::new(routing),
            budget: RwLock::new(budget),
            scheduler_state,
            rng,
            clock,
            stats: StdMutex::new(RouterStats::default()),
        }
    }

    /// Hot-swap the routing knobs. Validation failures leave the previous
    /// config active.
    pub async fn update_config(&self, config: RoutingConfig) -> Result<(), CoreError> {
        let invalid = |key: &str, reason: String| CoreError::ConfigInvalid {
            domain: "routing".into(),
            key: key.into(),
            reason,
        };
        if config.min_epsilon > config.max_epsilon {
            return Err(invalid("min_epsilon", "min_epsilon above max_epsilon".into()));
        }
        for (key, value) in [
            ("min_epsilon", config.min_epsilon),
            ("max_epsilon", config.max_epsilon),
            ("shadow_rate", config.shadow_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(key, format!("{value} outside [0, 1]")));
            }
        }
        if config.ensemble_size < 2 {
            return Err(invalid("ensemble_size", "must be at least 2".into()));
        }
        *self.routing.write().await = config;
        info!("router config updated");
        Ok(())
    }

    pub async fn update_budget(&self, budget: BudgetConfig) {
        *self.budget.write().await = budget;
    }

    pub fn stats(&self) -> RouterStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }

    /// Called by the execution engine when a shadow comparison resolves.
    pub fn note_shadow_result(&self, challenger_won: bool) {
        let mut stats = self.stats.lock().expect("stats lock poisoned");
        if challenger_won {
            stats.shadow_wins += 1;
        } else {
            stats.shadow_losses += 1;
        }
    }

    /// Produce an execution plan for one request.
    pub async fn plan(&self, request: &Request, features: &Features) -> Result<Plan, CoreError> {
        let routing = self.routing.read().await.clone();
        let budget = self.budget.read().await.clone();
        let state = self.scheduler_state.borrow().clone();
        let bucket = features.bucket();

        // Caller override wins outright when the provider is available.
        if let Some(plan) = self.override_plan(request, bucket).await {
            self.note_plan(&plan, false);
            return Ok(plan);
        }

        let required = required_capabilities(request.task_type);
        let available = self.registry.available_for(&required).await;
        let candidates = self
            .candidates(&available, bucket, routing.profile_ttl_ms)
            .await;

        let epsilon = (state.exploration_rate * routing.recipe_boost)
            .max(routing.min_epsilon)
            .min(routing.max_epsilon);

        if candidates.is_empty() {
            let plan = self.fallback_plan(request, bucket, &required, epsilon).await?;
            self.note_plan(&plan, true);
            return Ok(plan);
        }

        let explored = self.rng.next_f64() < epsilon;
        let chosen = if explored {
            candidates[self.rng.pick(candidates.len())].clone()
        } else {
            exploit(&candidates).clone()
        };

        let meta = |reasoning: String, confidence: f64| PlanMeta {
            request_id: request.id,
            task_class: bucket,
            reasoning,
            confidence,
            epsilon,
            explored,
        };

        let mut plan = if wants_ensemble(request, features, &candidates) {
            let members = top_k(&candidates, routing.ensemble_size);
            let confidence = members
                .iter()
                .map(|c| c.profile.confidence(routing.min_sample_threshold))
                .fold(0.0_f64, f64::max);
            let reasoning = format!(
                "ensemble of {} for {bucket}; creative/comparative task at {} complexity",
                members.len(),
                features.complexity.as_str(),
            );
            let providers = members
                .iter()
                .map(|c| (c.provider.id.clone(), c.provider.default_model.clone()))
                .collect();
            Plan::ensemble(
                providers,
                true,
                ENSEMBLE_MIN_RESPONSES,
                budget.ensemble_timeout_ms,
                meta(reasoning, confidence),
            )?
        } else if wants_validation(request, features, &routing) {
            self.validation_plan(request, features, &routing, &chosen, &candidates, meta)
                .await?
        } else {
            let reasoning = if explored {
                format!(
                    "exploring {} for {bucket} (epsilon {epsilon:.2})",
                    chosen.provider.id
                )
            } else {
                format!(
                    "chose {} for {bucket}; confidence {:.2} from {} attempts",
                    chosen.provider.id,
                    chosen.profile.confidence(routing.min_sample_threshold),
                    chosen.profile.attempts,
                )
            };
            let confidence = chosen.profile.confidence(routing.min_sample_threshold);
            Plan::single(
                chosen.provider.id.clone(),
                chosen.provider.default_model.clone(),
                meta(reasoning, confidence),
            )
        };

        // Shadow challenger: second-best candidate, recorded but never
        // surfaced. Quiet mode halves the effective rate.
        let effective_shadow = routing.shadow_rate * state.shadow_multiplier;
        if effective_shadow > 0.0 && self.rng.next_f64() < effective_shadow {
            let primary = plan
                .primary_provider()
                .map(|(id, _)| id.clone())
                .unwrap_or_else(|| chosen.provider.id.clone());
            if let Some(challenger) = second_best(&candidates, &primary) {
                debug!(challenger = %challenger.provider.id, "attaching shadow challenger");
                plan = plan.with_shadow(
                    challenger.provider.id.clone(),
                    challenger.provider.default_model.clone(),
                );
                self.stats
                    .lock()
                    .expect("stats lock poisoned")
                    .shadow_attached += 1;
            }
        }

        self.note_plan(&plan, false);
        Ok(plan)
    }

    /// Next-best provider for a stage retry, excluding already-tried ones.
    pub async fn next_best(
        &self,
        bucket: FeatureBucket,
        task_type: TaskType,
        exclude: &[ProviderId],
    ) -> Option<(ProviderId, String)> {
        let routing = self.routing.read().await.clone();
        let required = required_capabilities(task_type);
        let available = self.registry.available_for(&required).await;
        let candidates = self
            .candidates(&available, bucket, routing.profile_ttl_ms)
            .await;
        let mut ordered: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| !exclude.contains(&c.provider.id))
            .collect();
        ordered.sort_by(|a, b| rank(b, a));
        ordered
            .first()
            .map(|c| (c.provider.id.clone(), c.provider.default_model.clone()))
            .or_else(|| {
                // Fall back to any available provider we have not tried.
                available
                    .iter()
                    .find(|p| !exclude.contains(&p.id))
                    .map(|p| (p.id.clone(), p.default_model.clone()))
            })
    }

    async fn override_plan(&self, request: &Request, bucket: FeatureBucket) -> Option<Plan> {
        let wanted = request.provider_override.as_ref()?;
        let id = ProviderId::new(&wanted.provider);
        let provider = self.registry.get(&id).await?;
        if !provider.health.available {
            debug!(provider = %id, "override provider unavailable; routing normally");
            return None;
        }
        let model = wanted
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model.clone());
        let min_sample_threshold = self.routing.read().await.min_sample_threshold;
        let confidence = self
            .ledger
            .stats(&id, bucket)
            .await
            .map(|p| p.confidence(min_sample_threshold))
            .unwrap_or(1.0);
        Some(Plan::single(
            id.clone(),
            model,
            PlanMeta {
                request_id: request.id,
                task_class: bucket,
                reasoning: format!("caller override: {id}"),
                confidence,
                epsilon: 0.0,
                explored: false,
            },
        ))
    }

    async fn fallback_plan(
        &self,
        request: &Request,
        bucket: FeatureBucket,
        required: &BTreeSet<Capability>,
        epsilon: f64,
    ) -> Result<Plan, CoreError> {
        let Some(provider) = self.registry.cheapest_chat().await else {
            return Err(CoreError::NoProviderAvailable {
                needed: capability_list(required),
            });
        };
        let min_sample_threshold = self.routing.read().await.min_sample_threshold;
        let confidence = self
            .ledger
            .stats(&provider.id, bucket)
            .await
            .map(|p| p.confidence(min_sample_threshold))
            .unwrap_or(0.0);
        Ok(Plan::single(
            provider.id.clone(),
            provider.default_model.clone(),
            PlanMeta {
                request_id: request.id,
                task_class: bucket,
                reasoning: format!(
                    "no profiled candidate for {bucket}; fallback to cheapest healthy chat provider {}",
                    provider.id
                ),
                confidence,
                epsilon,
                explored: false,
            },
        ))
    }

    async fn validation_plan(
        &self,
        request: &Request,
        features: &Features,
        routing: &RoutingConfig,
        generate: &Candidate,
        candidates: &[Candidate],
        meta: impl Fn(String, f64) -> PlanMeta,
    ) -> Result<Plan, CoreError> {
        let skip_optimize = request.budget_tier == BudgetTier::Low;
        let mut stage_kinds = vec![StageKind::Generate, StageKind::Review, StageKind::Test];
        if !skip_optimize {
            stage_kinds.push(StageKind::Optimize);
        }

        let mut stages = Vec::with_capacity(stage_kinds.len());
        let mut confidence = f64::MAX;
        for kind in stage_kinds {
            let candidate = if kind == StageKind::Generate {
                generate.clone()
            } else {
                self.stage_candidate(kind, candidates)
            };
            confidence = confidence.min(candidate.profile.confidence(routing.min_sample_threshold));
            stages.push(StageAssignment {
                stage: kind,
                provider: candidate.provider.id.clone(),
                model: candidate.provider.default_model.clone(),
            });
        }

        let reasoning = format!(
            "validation loop for {}; {} at quality threshold {:.2}",
            features.bucket(),
            features.complexity.as_str(),
            request.quality_threshold,
        );
        Plan::validation_loop(
            stages,
            DEFAULT_MIN_CONFIDENCE,
            DEFAULT_STAGE_RETRIES,
            skip_optimize,
            meta(reasoning, if confidence == f64::MAX { 0.0 } else { confidence }),
        )
    }

    /// Reviewer and tester stages prefer code-capable providers; fall back
    /// to the general candidate pool when none qualifies.
    fn stage_candidate(&self, kind: StageKind, candidates: &[Candidate]) -> Candidate {
        let prefers_code = matches!(kind, StageKind::Review | StageKind::Test);
        if prefers_code {
            let code_capable: Vec<Candidate> = candidates
                .iter()
                .filter(|c| c.provider.capabilities.contains(&Capability::Code))
                .cloned()
                .collect();
            if !code_capable.is_empty() {
                return exploit(&code_capable).clone();
            }
        }
        exploit(candidates).clone()
    }

    async fn candidates(
        &self,
        available: &[Provider],
        bucket: FeatureBucket,
        profile_ttl_ms: Option<u64>,
    ) -> Vec<Candidate> {
        let now = self.clock.now_ms();
        let mut candidates = Vec::new();
        for provider in available {
            if let Some(profile) = self.ledger.stats(&provider.id, bucket).await {
                let fresh = profile_ttl_ms
                    .map(|ttl| profile.last_updated_ms.saturating_add(ttl) >= now)
                    .unwrap_or(true);
                if fresh {
                    candidates.push(Candidate {
                        provider: provider.clone(),
                        profile,
                    });
                }
            }
        }
        candidates
    }

    fn note_plan(&self, plan: &Plan, fallback: bool) {
        let mut stats = self.stats.lock().expect("stats lock poisoned");
        stats.plans_total += 1;
        if plan.explored() {
            stats.explored_total += 1;
        }
        if fallback {
            stats.fallback_plans += 1;
        }
        match plan.execution_mode() {
            domain::plan::ExecutionMode::Single => stats.single_plans += 1,
            domain::plan::ExecutionMode::Ensemble => stats.ensemble_plans += 1,
            domain::plan::ExecutionMode::ValidationLoop => stats.validation_plans += 1,
        }
    }
}

/// Capabilities a task type demands from providers.
pub fn required_capabilities(task_type: TaskType) -> BTreeSet<Capability> {
    match task_type {
        TaskType::Code | TaskType::Test => [Capability::Chat, Capability::Code].into_iter().collect(),
        TaskType::Creative | TaskType::General => [Capability::Chat].into_iter().collect(),
    }
}

fn capability_list(required: &BTreeSet<Capability>) -> String {
    required
        .iter()
        .map(|c| format!("{c:?}").to_lowercase())
        .collect::<Vec<_>>()
        .join("+")
}

/// Exploit ordering: highest q, then lower rolling latency, then lower
/// rolling cost.
fn rank(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    a.profile
        .q_value
        .partial_cmp(&b.profile.q_value)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(
            b.profile
                .latency_ms()
                .partial_cmp(&a.profile.latency_ms())
                .unwrap_or(std::cmp::Ordering::Equal),
        )
        .then(
            b.profile
                .cost()
                .partial_cmp(&a.profile.cost())
                .unwrap_or(std::cmp::Ordering::Equal),
        )
}

fn exploit(candidates: &[Candidate]) -> &Candidate {
    candidates
        .iter()
        .max_by(|a, b| rank(a, b))
        .expect("exploit requires a non-empty candidate set")
}

fn top_k(candidates: &[Candidate], k: usize) -> Vec<Candidate> {
    let mut ordered: Vec<Candidate> = candidates.to_vec();
    ordered.sort_by(|a, b| rank(b, a));
    ordered.truncate(k.max(2));
    ordered
}

fn second_best<'a>(candidates: &'a [Candidate], primary: &ProviderId) -> Option<&'a Candidate> {
    candidates
        .iter()
        .filter(|c| &c.provider.id != primary)
        .max_by(|a, b| rank(a, b))
}

fn wants_ensemble(request: &Request, features: &Features, candidates: &[Candidate]) -> bool {
    if candidates.len() < 2 {
        return false;
    }
    let complex_enough = matches!(features.complexity, Complexity::Complex | Complexity::Critical);
    let comparative = request.mode == Mode::Creative
        || ENSEMBLE_TRIGGER_KEYWORDS
            .iter()
            .any(|k| features.keywords.contains(*k));
    complex_enough && comparative
}

fn wants_validation(request: &Request, features: &Features, routing: &RoutingConfig) -> bool {
    if !routing.recipes_enabled {
        return false;
    }
    features.complexity == Complexity::Critical
        || (request.task_type == TaskType::Code && request.quality_threshold >= 0.9)
}
