//! Statistical check that the epsilon-greedy draw honors the configured
//! exploration rate over a large synthetic request stream.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use common::clock::{Clock, ManualClock, SeededRng};
use common::config::{BudgetConfig, RoutingConfig};
use common::event_bus::ControlBus;
use domain::features::FeatureBucket;
use domain::outcome::Outcome;
use domain::plan::PlanShape;
use domain::provider::{Capability, ProviderId};
use domain::request::Request;
use domain::scheduler::SchedulerState;
use feedback::persistence::memory::{MemoryLog, MemorySnapshots};
use feedback::{FeedbackLedger, LedgerConfig};
use llm::testing::{descriptor, ScriptedAdapter};
use llm::ProviderRegistry;
use router::{extract, RoutingPolicy};

async fn seed(ledger: &FeedbackLedger, provider: &str, bucket: FeatureBucket, successes: u32, failures: u32) {
    for success in std::iter::repeat(true)
        .take(successes as usize)
        .chain(std::iter::repeat(false).take(failures as usize))
    {
        let plan_id = Uuid::new_v4();
        ledger.register_plan(plan_id).await;
        let outcome = if success {
            Outcome::success(plan_id, ProviderId::new(provider), bucket, 100, 0.001, 0.9, 0)
        } else {
            Outcome::failure(
                plan_id,
                ProviderId::new(provider),
                bucket,
                100,
                common::errors::OutcomeErrorKind::Server,
                0,
            )
        };
        ledger.record(outcome).await.expect("seed");
    }
}

#[tokio::test]
async fn exploration_rate_is_obeyed_over_many_draws() {
    let clock = Arc::new(ManualClock::at(0));
    let registry = Arc::new(ProviderRegistry::new(
        ControlBus::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    for id in ["alpha", "beta", "gamma"] {
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

    let request = Request::new("hello there");
    let features = extract(&request);
    let bucket = features.bucket();
    // alpha is the clear argmax; the others trail.
    seed(&ledger, "alpha", bucket, 19, 1).await;
    seed(&ledger, "beta", bucket, 10, 10).await;
    seed(&ledger, "gamma", bucket, 5, 15).await;

    let (state_tx, _) = watch::channel(SchedulerState::normal(0.2));
    let policy = RoutingPolicy::new(
        Arc::clone(&registry),
        ledger,
        RoutingConfig {
            min_epsilon: 0.0,
            shadow_rate: 0.0,
            ..Default::default()
        },
        BudgetConfig::default(),
        state_tx.subscribe(),
        Arc::new(SeededRng::new(0xC0FFEE)),
        clock,
    );

    const DRAWS: usize = 10_000;
    let mut argmax_chosen = 0usize;
    let mut explored = 0usize;
    for _ in 0..DRAWS {
        let plan = policy.plan(&request, &features).await.expect("plan");
        if plan.explored() {
            explored += 1;
        }
        if let PlanShape::Single { provider, .. } = plan.shape() {
            if provider.as_str() == "alpha" {
                argmax_chosen += 1;
            }
        }
    }

    // Explore branch taken at the configured epsilon.
    let explore_fraction = explored as f64 / DRAWS as f64;
    assert!(
        (0.18..=0.22).contains(&explore_fraction),
        "explore fraction {explore_fraction} outside [0.18, 0.22]"
    );

    // Exploit picks argmax; uniform exploration still lands on it 1/3 of
    // the time, so the overall match rate sits near 0.8 + 0.2/3.
    let argmax_fraction = argmax_chosen as f64 / DRAWS as f64;
    assert!(
        (0.78..=0.92).contains(&argmax_fraction),
        "argmax fraction {argmax_fraction} outside [0.78, 0.92]"
    );
    assert_eq!(policy.stats().plans_total as usize, DRAWS);
}
