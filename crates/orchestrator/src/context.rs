//! Process-wide service wiring.
//!
//! `CoreContext` constructs every component once at startup and passes them
//! around explicitly; no component holds a back-pointer to another. Cross-
//! component signals travel as events (control bus, outcome stream, state
//! snapshots), and background work drains explicitly on shutdown.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use common::clock::{Clock, RngSource};
use common::config::{ConfigStore, CoreConfig};
use common::errors::CoreError;
use common::event_bus::ControlBus;
use common::topics::Topics;
use domain::contracts::{AppendLog, Sink, SnapshotStore};
use domain::envelope::Envelope;
use domain::request::Request;
use feedback::{FeedbackLedger, LedgerConfig};
use llm::ProviderRegistry;
use router::RoutingPolicy;

use crate::engine::ExecutionEngine;
use crate::scheduler::LearningScheduler;
use crate::scorer::HeuristicScorer;

pub struct CoreContext {
    pub bus: ControlBus,
    pub config: Arc<ConfigStore>,
    pub clock: Arc<dyn Clock>,
    pub rng: Arc<dyn RngSource>,
    pub registry: Arc<ProviderRegistry>,
    pub ledger: Arc<FeedbackLedger>,
    pub scheduler: Arc<LearningScheduler>,
    pub router: Arc<RoutingPolicy>,
    pub engine: Arc<ExecutionEngine>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl CoreContext {
    /// Construct and wire every component, restore persisted state, and
    /// start the background loops (outcome pump, scheduler tick, periodic
    /// snapshots, config propagation).
    pub async fn bootstrap(
        core_config: CoreConfig,
        log: Arc<dyn AppendLog>,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RngSource>,
    ) -> anyhow::Result<Arc<Self>> {
        let bus = ControlBus::default();
        let config = Arc::new(ConfigStore::new(
            core_config.clone(),
            bus.clone(),
            Arc::clone(&clock),
        ));
        let registry = Arc::new(ProviderRegistry::new(bus.clone(), Arc::clone(&clock)));
        let ledger = FeedbackLedger::new(
            LedgerConfig {
                ewma_half_life: core_config.learning.ewma_half_life,
                min_sample_threshold: core_config.routing.min_sample_threshold,
                queue_capacity: core_config.learning.queue_capacity,
                keep_recent: 256,
            },
            log,
            snapshots,
        );
        let (scheduler, state_rx) = LearningScheduler::new(
            core_config.scheduler.clone(),
            core_config.routing.min_epsilon,
            core_config.routing.max_epsilon,
            bus.clone(),
            Arc::clone(&clock),
        );
        if let Some(aux) = ledger.restore().await? {
            match serde_json::from_value(aux) {
                Ok(state) => scheduler.restore_state(state).await,
                Err(err) => warn!(error = %err, "ignoring unreadable scheduler snapshot"),
            }
        }
        let router = Arc::new(RoutingPolicy::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            core_config.routing.clone(),
            core_config.budget.clone(),
            state_rx.clone(),
            Arc::clone(&rng),
            Arc::clone(&clock),
        ));
        let engine = ExecutionEngine::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::clone(&router),
            Arc::new(HeuristicScorer),
            bus.clone(),
            Arc::clone(&clock),
            Arc::clone(&rng),
            core_config.budget.clone(),
            state_rx,
        );

        let context = Arc::new(Self {
            bus,
            config,
            clock,
            rng,
            registry,
            ledger,
            scheduler,
            router,
            engine,
            tasks: StdMutex::new(Vec::new()),
        });
        context.start_background(&core_config);
        Ok(context)
    }

    /// Plan and execute one request end to end.
    pub async fn handle_request(
        &self,
        request: &Request,
        sink: Arc<dyn Sink>,
    ) -> Result<Envelope, CoreError> {
        let features = router::extract(request);
        let plan = self.router.plan(request, &features).await?;
        self.engine.execute(plan, request, sink).await
    }

    fn start_background(self: &Arc<Self>, core_config: &CoreConfig) {
        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");

        // Outcome pump: the scheduler observes every accepted outcome.
        {
            let scheduler = Arc::clone(&self.scheduler);
            let mut rx = self.ledger.subscribe_outcomes();
            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(outcome) => scheduler.on_outcome(&outcome).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "outcome pump lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        // Scheduler pulse.
        {
            let scheduler = Arc::clone(&self.scheduler);
            let interval = Duration::from_millis(core_config.scheduler.tick_interval_ms);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    scheduler.tick().await;
                }
            }));
        }

        // Periodic snapshots: feedback rollups plus scheduler state.
        {
            let ledger = Arc::clone(&self.ledger);
            let scheduler = Arc::clone(&self.scheduler);
            let interval = Duration::from_millis(core_config.learning.snapshot_interval_ms);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // skip the immediate first tick
                loop {
                    ticker.tick().await;
                    let aux = serde_json::to_value(scheduler.snapshot_state().await).ok();
                    if let Err(err) = ledger.snapshot_with(aux).await {
                        warn!(error = %err, "periodic snapshot failed");
                    }
                }
            }));
        }

        // Config propagation: components re-read on the next boundary.
        {
            let context = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut rx = context.bus.subscribe(Topics::CONFIG_UPDATED).await;
                while rx.recv().await.is_ok() {
                    let snapshot = context.config.snapshot().await;
                    debug!(version = snapshot.version, "propagating config update");
                    if let Err(err) = context
                        .router
                        .update_config(snapshot.config.routing.clone())
                        .await
                    {
                        warn!(error = %err, "router rejected config update");
                    }
                    context
                        .router
                        .update_budget(snapshot.config.budget.clone())
                        .await;
                    context.engine.update_budget(snapshot.config.budget.clone()).await;
                    context
                        .scheduler
                        .update_config(snapshot.config.scheduler.clone())
                        .await;
                    context
                        .scheduler
                        .update_epsilon_bounds(
                            snapshot.config.routing.min_epsilon,
                            snapshot.config.routing.max_epsilon,
                        )
                        .await;
                }
            }));
        }
    }

    /// Drain background work and persist a final snapshot.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        for task in self.tasks.lock().expect("tasks lock poisoned").drain(..) {
            task.abort();
        }
        self.ledger.drain().await?;
        let aux = serde_json::to_value(self.scheduler.snapshot_state().await).ok();
        self.ledger.snapshot_with(aux).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::clock::{SeededRng, SystemClock};
    use domain::provider::Capability;
    use feedback::persistence::memory::{MemoryLog, MemorySnapshots};
    use llm::testing::{descriptor, ScriptedAdapter};

    #[tokio::test]
    async fn bootstrap_wires_a_working_request_path() {
        let context = CoreContext::bootstrap(
            CoreConfig::default(),
            Arc::new(MemoryLog::default()),
            Arc::new(MemorySnapshots::default()),
            Arc::new(SystemClock),
            Arc::new(SeededRng::new(1)),
        )
        .await
        .expect("bootstrap");
        context
            .registry
            .register(
                descriptor("p1", &[Capability::Chat], 1.0),
                Arc::new(ScriptedAdapter::replying("four")),
            )
            .await;

        let sink = Arc::new(crate::sink::BufferingSink::new());
        let request = Request::new("What is 2+2?");
        let envelope = context
            .handle_request(&request, sink.clone() as Arc<dyn Sink>)
            .await
            .expect("envelope");

        assert_eq!(envelope.response.as_deref(), Some("four"));
        assert!(sink.envelope().is_some());
        context.shutdown().await.expect("shutdown");
    }
}
