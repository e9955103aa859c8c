//! End-to-end scenarios for the execution engine against scripted
//! adapters: happy path, straggler ensembles, validation retries,
//! registry-wide outages, mid-stream cancellation, and burst exploration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use common::clock::{Clock, ManualClock, SeededRng};
use common::config::{BudgetConfig, RoutingConfig};
use common::errors::{CoreError, ProviderError};
use common::event_bus::ControlBus;
use domain::contracts::{Scorer, Sink};
use domain::envelope::{EnvelopeStatus, ProviderRole, ValidationStatus};
use domain::features::{Complexity, FeatureBucket, Features, TaskDomain};
use domain::outcome::Outcome;
use domain::plan::{ExecutionMode, Plan, PlanMeta, StageAssignment, StageKind};
use domain::provider::{Capability, ProviderId};
use domain::request::{Mode, Request, TaskType};
use domain::scheduler::{SchedulerMode, SchedulerState};
use feedback::persistence::memory::{MemoryLog, MemorySnapshots};
use feedback::{FeedbackLedger, LedgerConfig};
use llm::testing::{descriptor, ScriptedAdapter, ScriptedStep};
use llm::ProviderRegistry;
use orchestrator::scorer::ScriptedScorer;
use orchestrator::sink::{BufferingSink, StreamingSink};
use orchestrator::{ExecutionEngine, HeuristicScorer, LearningScheduler};
use router::{extract, RoutingPolicy};

fn test_budget() -> BudgetConfig {
    BudgetConfig {
        call_timeout_ms: 2_000,
        ensemble_timeout_ms: 800,
        validation_slack_ms: 2_000,
        max_retries: 2,
        backoff_base_ms: 10,
        backoff_cap_ms: 50,
    }
}

struct Harness {
    registry: Arc<ProviderRegistry>,
    ledger: Arc<FeedbackLedger>,
    router: Arc<RoutingPolicy>,
    engine: Arc<ExecutionEngine>,
    state_tx: watch::Sender<SchedulerState>,
}

impl Harness {
    async fn new(
        providers: Vec<(&str, f64, Vec<Capability>, Arc<ScriptedAdapter>)>,
        scorer: Arc<dyn Scorer>,
        exploration: f64,
        seed: u64,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at(0));
        let bus = ControlBus::default();
        let registry = Arc::new(ProviderRegistry::new(bus.clone(), Arc::clone(&clock)));
        for (id, cost, caps, adapter) in providers {
            registry.register(descriptor(id, &caps, cost), adapter).await;
        }
        let ledger = FeedbackLedger::new(
            LedgerConfig::default(),
            Arc::new(MemoryLog::default()),
            Arc::new(MemorySnapshots::default()),
        );
        let (state_tx, state_rx) = watch::channel(SchedulerState::normal(exploration));
        let rng = Arc::new(SeededRng::new(seed));
        let router = Arc::new(RoutingPolicy::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            RoutingConfig {
                min_epsilon: 0.0,
                shadow_rate: 0.0,
                ..Default::default()
            },
            test_budget(),
            state_rx.clone(),
            rng.clone(),
            Arc::clone(&clock),
        ));
        let engine = ExecutionEngine::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::clone(&router),
            scorer,
            bus,
            clock,
            rng,
            test_budget(),
            state_rx,
        );
        Self {
            registry,
            ledger,
            router,
            engine,
            state_tx,
        }
    }

    async fn seed_profile(&self, provider: &str, bucket: FeatureBucket, successes: u32, failures: u32) {
        for success in std::iter::repeat(true)
            .take(successes as usize)
            .chain(std::iter::repeat(false).take(failures as usize))
        {
            let plan_id = Uuid::new_v4();
            self.ledger.register_plan(plan_id).await;
            let outcome = if success {
                Outcome::success(plan_id, ProviderId::new(provider), bucket, 200, 0.001, 0.95, 0)
            } else {
                Outcome::failure(
                    plan_id,
                    ProviderId::new(provider),
                    bucket,
                    200,
                    common::errors::OutcomeErrorKind::Server,
                    0,
                )
            };
            self.ledger.record(outcome).await.expect("seed");
        }
    }

    async fn outcomes_for(&self, plan_id: Uuid) -> Vec<Outcome> {
        self.ledger
            .recent(256, None)
            .await
            .into_iter()
            .filter(|o| o.plan_id == plan_id)
            .collect()
    }
}

fn meta(bucket: FeatureBucket) -> PlanMeta {
    PlanMeta {
        request_id: Uuid::new_v4(),
        task_class: bucket,
        reasoning: "test plan".into(),
        confidence: 0.9,
        epsilon: 0.0,
        explored: false,
    }
}

fn general_bucket() -> FeatureBucket {
    FeatureBucket::new(TaskDomain::General, Complexity::Simple)
}

fn code_bucket() -> FeatureBucket {
    FeatureBucket::new(TaskDomain::Code, Complexity::Critical)
}

// Scenario 1: single happy path through the router and engine.
#[tokio::test]
async fn single_happy_path() {
    let harness = Harness::new(
        vec![(
            "p1",
            1.0,
            vec![Capability::Chat],
            Arc::new(ScriptedAdapter::replying("4")),
        )],
        Arc::new(HeuristicScorer),
        0.0,
        1,
    )
    .await;

    let request = Request::new("What is 2+2?").with_mode(Mode::Quick);
    let features = extract(&request);
    harness.seed_profile("p1", features.bucket(), 19, 1).await;

    let plan = harness.router.plan(&request, &features).await.expect("plan");
    let plan_id = plan.id();
    let sink = Arc::new(BufferingSink::new());
    let envelope = harness
        .engine
        .execute(plan, &request, sink.clone() as Arc<dyn Sink>)
        .await
        .expect("envelope");

    assert_eq!(envelope.status, EnvelopeStatus::Completed);
    assert_eq!(envelope.meta.routing.execution_mode, ExecutionMode::Single);
    assert_eq!(envelope.meta.providers.len(), 1);
    let trace = &envelope.meta.providers[0];
    assert_eq!(trace.provider, "p1");
    assert_eq!(trace.role, ProviderRole::Primary);
    assert!(trace.success);
    assert_eq!(envelope.response.as_deref(), Some("4"));

    let outcomes = harness.outcomes_for(plan_id).await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
}

// Scenario 2: ensemble with one straggler past the deadline.
#[tokio::test]
async fn ensemble_with_straggler_synthesizes_from_quorum() {
    let harness = Harness::new(
        vec![
            (
                "p1",
                1.0,
                vec![Capability::Chat],
                Arc::new(ScriptedAdapter::replying("answer from p1")),
            ),
            (
                "p2",
                2.0,
                vec![Capability::Chat],
                Arc::new(ScriptedAdapter::replying("answer from p2")),
            ),
            (
                "p3",
                3.0,
                vec![Capability::Chat],
                Arc::new(ScriptedAdapter::replying_after(
                    "too late",
                    Duration::from_secs(30),
                )),
            ),
        ],
        Arc::new(HeuristicScorer),
        0.0,
        2,
    )
    .await;

    let bucket = FeatureBucket::new(TaskDomain::Creative, Complexity::Complex);
    let providers = vec![
        (ProviderId::new("p1"), "p1-default".to_string()),
        (ProviderId::new("p2"), "p2-default".to_string()),
        (ProviderId::new("p3"), "p3-default".to_string()),
    ];
    let plan = Plan::ensemble(providers, true, 2, 500, meta(bucket)).expect("plan");
    let plan_id = plan.id();

    let request = Request::new("brainstorm ideas").with_mode(Mode::Creative);
    let sink = Arc::new(BufferingSink::new());
    let envelope = harness
        .engine
        .execute(plan, &request, sink as Arc<dyn Sink>)
        .await
        .expect("envelope");

    assert_eq!(envelope.status, EnvelopeStatus::Completed);
    assert_eq!(envelope.meta.routing.execution_mode, ExecutionMode::Ensemble);
    assert!(envelope.meta.consensus.is_some(), "consensus non-null");
    assert!((envelope.meta.consensus.unwrap() - 2.0 / 3.0).abs() < 1e-9);
    assert!(envelope.response.is_some());

    // One synthesizer trace; the straggler appears as a failed contact.
    assert!(envelope
        .meta
        .providers
        .iter()
        .any(|t| t.role == ProviderRole::Synthesizer));
    assert!(envelope
        .meta
        .providers
        .iter()
        .any(|t| t.provider == "p3" && !t.success));

    // Three member outcomes recorded; p3's as a failure.
    let outcomes = harness.outcomes_for(plan_id).await;
    let p3 = outcomes
        .iter()
        .find(|o| o.provider.as_str() == "p3")
        .expect("straggler outcome");
    assert!(!p3.success);
    for id in ["p1", "p2"] {
        assert!(outcomes
            .iter()
            .any(|o| o.provider.as_str() == id && o.success));
    }
}

// Scenario 3: validation loop with one reviewer retry.
#[tokio::test]
async fn validation_loop_retry_swaps_reviewer() {
    let harness = Harness::new(
        vec![
            (
                "p1",
                1.0,
                vec![Capability::Chat, Capability::Code],
                Arc::new(ScriptedAdapter::replying("generated solution")),
            ),
            (
                "p2",
                2.0,
                vec![Capability::Chat, Capability::Code],
                Arc::new(ScriptedAdapter::replying("weak review")),
            ),
            (
                "p3",
                3.0,
                vec![Capability::Chat, Capability::Code],
                Arc::new(ScriptedAdapter::replying("thorough review, all fixed")),
            ),
        ],
        // generate 0.9, review #1 0.6 (below gate), review #2 0.85, test 0.9
        Arc::new(ScriptedScorer::new(vec![0.9, 0.6, 0.85, 0.9], 0.9)),
        0.0,
        3,
    )
    .await;

    let bucket = code_bucket();
    harness.seed_profile("p1", bucket, 8, 2).await;
    harness.seed_profile("p2", bucket, 6, 4).await;
    harness.seed_profile("p3", bucket, 9, 1).await;

    let stages = vec![
        StageAssignment {
            stage: StageKind::Generate,
            provider: ProviderId::new("p1"),
            model: "p1-default".into(),
        },
        StageAssignment {
            stage: StageKind::Review,
            provider: ProviderId::new("p2"),
            model: "p2-default".into(),
        },
        StageAssignment {
            stage: StageKind::Test,
            provider: ProviderId::new("p1"),
            model: "p1-default".into(),
        },
    ];
    let plan = Plan::validation_loop(stages, 0.8, 2, true, meta(bucket)).expect("plan");
    let plan_id = plan.id();

    let request = Request::new("implement the parser")
        .with_task_type(TaskType::Code)
        .with_quality_threshold(0.9);
    let sink = Arc::new(BufferingSink::new());
    let envelope = harness
        .engine
        .execute(plan, &request, sink.clone() as Arc<dyn Sink>)
        .await
        .expect("envelope");

    assert_eq!(envelope.status, EnvelopeStatus::Completed);
    assert_eq!(
        envelope.meta.validation_status,
        Some(ValidationStatus::Passed)
    );
    // Four provider contacts: generate, review x2, test.
    assert_eq!(envelope.meta.providers.len(), 4);
    let reviewers: Vec<&str> = envelope
        .meta
        .providers
        .iter()
        .filter(|t| t.role == ProviderRole::Reviewer)
        .map(|t| t.provider.as_str())
        .collect();
    assert_eq!(reviewers.len(), 2);
    assert_eq!(reviewers[0], "p2");
    assert_ne!(reviewers[1], "p2", "retry re-routes to the next-best provider");

    let outcomes = harness.outcomes_for(plan_id).await;
    assert_eq!(outcomes.len(), 4);
    // Stage scores land in the ledger as quality.
    assert!(outcomes.iter().any(|o| (o.quality_score - 0.6).abs() < 1e-9));

    let stage_names: Vec<String> = sink.stages().iter().map(|s| s.stage.clone()).collect();
    assert_eq!(stage_names, vec!["generate", "review", "review", "test"]);
}

// Scenario 4: every provider cooling; planning fails, nothing is recorded.
#[tokio::test]
async fn all_providers_down_fails_planning() {
    let harness = Harness::new(
        vec![
            (
                "p1",
                1.0,
                vec![Capability::Chat],
                Arc::new(ScriptedAdapter::replying("ok")),
            ),
            (
                "p2",
                2.0,
                vec![Capability::Chat],
                Arc::new(ScriptedAdapter::replying("ok")),
            ),
        ],
        Arc::new(HeuristicScorer),
        0.0,
        4,
    )
    .await;

    for id in ["p1", "p2"] {
        for _ in 0..3 {
            harness
                .registry
                .report(&ProviderId::new(id), llm::HealthEvent::TransientFail)
                .await;
        }
    }

    let request = Request::new("anyone there?");
    let features = extract(&request);
    let err = harness
        .router
        .plan(&request, &features)
        .await
        .expect_err("no providers");
    assert!(matches!(err, CoreError::NoProviderAvailable { .. }));
    assert!(harness.ledger.recent(16, None).await.is_empty());
}

// Scenario 5: cancellation mid-stream keeps delivered chunks and stops
// recording within bounded slack.
#[tokio::test]
async fn cancellation_mid_stream() {
    let content = "one two three four five six seven eight nine ten \
                   eleven twelve thirteen fourteen fifteen sixteen";
    let harness = Harness::new(
        vec![(
            "p1",
            1.0,
            vec![Capability::Chat, Capability::Stream],
            Arc::new(ScriptedAdapter::replying_after(
                content,
                Duration::from_millis(1_500),
            )),
        )],
        Arc::new(HeuristicScorer),
        0.0,
        5,
    )
    .await;

    let plan = Plan::single(
        ProviderId::new("p1"),
        "p1-default".into(),
        meta(general_bucket()),
    );
    let plan_id = plan.id();
    let request = Request::new("stream me a story");
    let sink = Arc::new(StreamingSink::new());

    let engine = Arc::clone(&harness.engine);
    let sink_for_exec = sink.clone() as Arc<dyn Sink>;
    let exec = tokio::spawn(async move { engine.execute(plan, &request, sink_for_exec).await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(harness.engine.cancel(plan_id), "plan should be in flight");

    let envelope = exec.await.expect("join").expect("envelope");
    assert_eq!(envelope.status, EnvelopeStatus::Cancelled);
    assert!(
        !sink.buffered().is_empty(),
        "chunks delivered before the cancel are kept"
    );
    assert!(envelope.response.is_none());

    let outcomes = harness.outcomes_for(plan_id).await;
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    // Cancellation is labelled as such, not as a provider fault.
    assert_eq!(
        outcomes[0].error_kind,
        Some(common::errors::OutcomeErrorKind::Cancelled)
    );

    // Quiescence: no further outcomes within bounded slack.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.outcomes_for(plan_id).await.len(), 1);
}

// Ensemble quorum property: result iff m >= k, with all traces recorded.
#[tokio::test]
async fn ensemble_quorum_boundary() {
    for (succeeding, expect_ok) in [(3usize, true), (2, true), (1, false), (0, false)] {
        let mut providers = Vec::new();
        for i in 0..3usize {
            let adapter = if i < succeeding {
                Arc::new(ScriptedAdapter::replying("fine"))
            } else {
                Arc::new(ScriptedAdapter::scripted(vec![
                    ScriptedStep::fail(ProviderError::server("boom")),
                    ScriptedStep::fail(ProviderError::server("boom")),
                ]))
            };
            providers.push((
                ["p1", "p2", "p3"][i],
                1.0 + i as f64,
                vec![Capability::Chat],
                adapter,
            ));
        }
        let harness = Harness::new(providers, Arc::new(HeuristicScorer), 0.0, 6).await;

        let members = vec![
            (ProviderId::new("p1"), "p1-default".to_string()),
            (ProviderId::new("p2"), "p2-default".to_string()),
            (ProviderId::new("p3"), "p3-default".to_string()),
        ];
        let plan = Plan::ensemble(members, false, 2, 500, meta(general_bucket())).expect("plan");
        let plan_id = plan.id();
        let request = Request::new("compare notes");
        let envelope = harness
            .engine
            .execute(plan, &request, Arc::new(BufferingSink::new()) as Arc<dyn Sink>)
            .await
            .expect("envelope");

        if expect_ok {
            assert_eq!(envelope.status, EnvelopeStatus::Completed, "m={succeeding}");
            assert!(envelope.response.is_some());
        } else {
            assert_eq!(envelope.status, EnvelopeStatus::Failed, "m={succeeding}");
            assert_eq!(
                envelope.error_kind.as_deref(),
                Some("ensemble_under_quorum")
            );
            assert!(envelope.response.is_none());
        }
        assert_eq!(
            harness.outcomes_for(plan_id).await.len(),
            3,
            "every attempted member records an outcome (m={succeeding})"
        );
    }
}

// Retries: transient failures retry with backoff, then succeed.
#[tokio::test]
async fn single_retries_transient_then_succeeds() {
    let adapter = Arc::new(ScriptedAdapter::scripted(vec![
        ScriptedStep::fail(ProviderError::rate_limited("429")),
        ScriptedStep::reply("recovered"),
    ]));
    let harness = Harness::new(
        vec![("p1", 1.0, vec![Capability::Chat], adapter.clone())],
        Arc::new(HeuristicScorer),
        0.0,
        7,
    )
    .await;

    let plan = Plan::single(
        ProviderId::new("p1"),
        "p1-default".into(),
        meta(general_bucket()),
    );
    let plan_id = plan.id();
    let request = Request::new("try again please");
    let envelope = harness
        .engine
        .execute(plan, &request, Arc::new(BufferingSink::new()) as Arc<dyn Sink>)
        .await
        .expect("envelope");

    assert_eq!(envelope.status, EnvelopeStatus::Completed);
    assert_eq!(envelope.response.as_deref(), Some("recovered"));
    assert_eq!(adapter.call_count(), 2);

    // Both the failed attempt and the success are in the ledger.
    let outcomes = harness.outcomes_for(plan_id).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().any(|o| !o.success));
    assert!(outcomes.iter().any(|o| o.success));
}

// Non-retriable errors surface immediately and disable the provider.
#[tokio::test]
async fn single_permanent_failure_disables_provider() {
    let adapter = Arc::new(ScriptedAdapter::scripted(vec![ScriptedStep::fail(
        ProviderError::auth("bad key"),
    )]));
    let harness = Harness::new(
        vec![("p1", 1.0, vec![Capability::Chat], adapter.clone())],
        Arc::new(HeuristicScorer),
        0.0,
        8,
    )
    .await;

    let plan = Plan::single(
        ProviderId::new("p1"),
        "p1-default".into(),
        meta(general_bucket()),
    );
    let request = Request::new("hello");
    let envelope = harness
        .engine
        .execute(plan, &request, Arc::new(BufferingSink::new()) as Arc<dyn Sink>)
        .await
        .expect("envelope");

    assert_eq!(envelope.status, EnvelopeStatus::Failed);
    assert_eq!(envelope.error_kind.as_deref(), Some("auth"));
    assert_eq!(adapter.call_count(), 1, "no retry on permanent failure");

    let provider = harness
        .registry
        .get(&ProviderId::new("p1"))
        .await
        .expect("provider");
    assert_eq!(provider.health.state, domain::provider::HealthState::Disabled);
}

// Shadow challengers run in parallel, are recorded, and never surface.
#[tokio::test]
async fn shadow_challenger_recorded_but_not_surfaced() {
    let harness = Harness::new(
        vec![
            (
                "p1",
                1.0,
                vec![Capability::Chat],
                Arc::new(ScriptedAdapter::replying("primary answer")),
            ),
            (
                "p2",
                2.0,
                vec![Capability::Chat],
                Arc::new(ScriptedAdapter::replying("shadow answer")),
            ),
        ],
        Arc::new(HeuristicScorer),
        0.0,
        9,
    )
    .await;

    let plan = Plan::single(
        ProviderId::new("p1"),
        "p1-default".into(),
        meta(general_bucket()),
    )
    .with_shadow(ProviderId::new("p2"), "p2-default".into());
    let plan_id = plan.id();
    let request = Request::new("hello");
    let envelope = harness
        .engine
        .execute(plan, &request, Arc::new(BufferingSink::new()) as Arc<dyn Sink>)
        .await
        .expect("envelope");

    assert_eq!(envelope.response.as_deref(), Some("primary answer"));
    let shadow = envelope
        .meta
        .providers
        .iter()
        .find(|t| t.role == ProviderRole::Shadow)
        .expect("shadow trace present");
    assert_eq!(shadow.provider, "p2");

    let outcomes = harness.outcomes_for(plan_id).await;
    assert_eq!(outcomes.len(), 2, "primary and shadow both recorded");
    let stats = harness.router.stats();
    assert_eq!(stats.shadow_wins + stats.shadow_losses, 1);
}

// The engine refuses new plans while the scheduler is stopped.
#[tokio::test]
async fn stopped_scheduler_refuses_new_plans() {
    let harness = Harness::new(
        vec![(
            "p1",
            1.0,
            vec![Capability::Chat],
            Arc::new(ScriptedAdapter::replying("ok")),
        )],
        Arc::new(HeuristicScorer),
        0.0,
        10,
    )
    .await;

    let mut stopped = SchedulerState::normal(0.0);
    stopped.mode = SchedulerMode::Stopped;
    harness.state_tx.send(stopped).expect("state update");

    let plan = Plan::single(
        ProviderId::new("p1"),
        "p1-default".into(),
        meta(general_bucket()),
    );
    let request = Request::new("hello");
    let err = harness
        .engine
        .execute(plan, &request, Arc::new(BufferingSink::new()) as Arc<dyn Sink>)
        .await
        .expect_err("locked");
    assert!(matches!(err, CoreError::SchedulerLocked));
}

// Scenario 6: burst mode boosts the observed exploration fraction, and the
// boost decays when the window expires.
#[tokio::test]
async fn burst_mode_boosts_exploration_fraction() {
    let manual = Arc::new(ManualClock::at(0));
    let clock: Arc<dyn Clock> = manual.clone();
    let bus = ControlBus::default();
    let registry = Arc::new(ProviderRegistry::new(bus.clone(), Arc::clone(&clock)));
    for id in ["p1", "p2", "p3"] {
        registry
            .register(
                descriptor(id, &[Capability::Chat], 1.0),
                Arc::new(ScriptedAdapter::replying("ok")),
            )
            .await;
    }
    let ledger = FeedbackLedger::new(
        LedgerConfig::default(),
        Arc::new(MemoryLog::default()),
        Arc::new(MemorySnapshots::default()),
    );
    let (scheduler, state_rx) = LearningScheduler::new(
        common::config::SchedulerConfig {
            base_exploration: 0.1,
            ..Default::default()
        },
        0.0,
        0.5,
        bus,
        Arc::clone(&clock),
    );
    let router = RoutingPolicy::new(
        registry,
        Arc::clone(&ledger),
        RoutingConfig {
            min_epsilon: 0.0,
            shadow_rate: 0.0,
            ..Default::default()
        },
        test_budget(),
        state_rx,
        Arc::new(SeededRng::new(0xBEEF)),
        clock,
    );

    let request = Request::new("hello there");
    let features = extract(&request);
    let bucket = features.bucket();
    for id in ["p1", "p2", "p3"] {
        for i in 0..10u32 {
            let plan_id = Uuid::new_v4();
            ledger.register_plan(plan_id).await;
            let outcome = if i % 10 < 7 {
                Outcome::success(plan_id, ProviderId::new(id), bucket, 100, 0.001, 0.9, 0)
            } else {
                Outcome::failure(
                    plan_id,
                    ProviderId::new(id),
                    bucket,
                    100,
                    common::errors::OutcomeErrorKind::Server,
                    0,
                )
            };
            ledger.record(outcome).await.expect("seed");
        }
    }

    async fn explore_fraction(
        router: &RoutingPolicy,
        draws: usize,
        request: &Request,
        features: &Features,
    ) -> f64 {
        let mut explored = 0usize;
        for _ in 0..draws {
            let plan = router.plan(request, features).await.expect("plan");
            if plan.explored() {
                explored += 1;
            }
        }
        explored as f64 / draws as f64
    }

    const DRAWS: usize = 1_000;
    let baseline = explore_fraction(&router, DRAWS, &request, &features).await;
    assert!(
        (0.07..=0.13).contains(&baseline),
        "baseline fraction {baseline} outside [0.07, 0.13]"
    );

    scheduler
        .request_mode(SchedulerMode::Burst, Some(Duration::from_secs(60)), Some(2.0))
        .await
        .expect("burst");
    let boosted = explore_fraction(&router, DRAWS, &request, &features).await;
    assert!(
        (0.17..=0.23).contains(&boosted),
        "burst fraction {boosted} outside [0.17, 0.23]"
    );

    manual.set(60_001);
    scheduler.tick().await;
    let decayed = explore_fraction(&router, DRAWS, &request, &features).await;
    assert!(
        (0.07..=0.13).contains(&decayed),
        "post-burst fraction {decayed} outside [0.07, 0.13]"
    );
}
