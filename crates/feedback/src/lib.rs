//! Feedback ledger: append-only outcome log plus derived per-provider
//! rollups.
//!
//! The hot path never blocks on disk. `record` updates the in-memory
//! rollup synchronously and hands the durable record to a bounded queue; a
//! background writer drains the queue into the JSONL log. Overflow drops
//! the oldest queued record and counts it.

pub mod persistence;
pub mod rollup;

pub use persistence::{FileSnapshots, JsonlLog, LedgerRecord};
pub use rollup::{Ewma, ProviderProfile, RollupTable};

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{broadcast, watch, Mutex, Notify, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use common::errors::CoreError;
use domain::contracts::{AppendLog, SnapshotStore};
use domain::features::FeatureBucket;
use domain::outcome::Outcome;
use domain::provider::ProviderId;

const KNOWN_PLAN_CAP: usize = 4_096;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub ewma_half_life: u32,
    pub min_sample_threshold: u32,
    pub queue_capacity: usize,
    pub keep_recent: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ewma_half_life: 20,
            min_sample_threshold: 5,
            queue_capacity: 1_024,
            keep_recent: 256,
        }
    }
}

struct LedgerInner {
    rollup: RollupTable,
    recent: VecDeque<Outcome>,
    seen: HashSet<(Uuid, ProviderId, u32)>,
    known_plans: HashSet<Uuid>,
    plan_order: VecDeque<Uuid>,
}

struct PersistQueue {
    records: StdMutex<VecDeque<LedgerRecord>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl PersistQueue {
    fn push(&self, record: LedgerRecord) {
        let mut records = self.records.lock().expect("queue lock poisoned");
        if records.len() >= self.capacity {
            records.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        records.push_back(record);
        drop(records);
        self.notify.notify_one();
    }

    fn drain(&self) -> Vec<LedgerRecord> {
        let mut records = self.records.lock().expect("queue lock poisoned");
        records.drain(..).collect()
    }
}

pub struct FeedbackLedger {
    inner: RwLock<LedgerInner>,
    queue: Arc<PersistQueue>,
    log: Arc<dyn AppendLog>,
    snapshots: Arc<dyn SnapshotStore>,
    /// Serializes queue flushes between the writer task and `snapshot`.
    flush_lock: Mutex<()>,
    last_offset: Arc<StdMutex<Option<u64>>>,
    duplicates: AtomicU64,
    change_counter: AtomicU64,
    change_tx: watch::Sender<u64>,
    outcome_tx: broadcast::Sender<Outcome>,
    writer: StdMutex<Option<tokio::task::JoinHandle<()>>>,
    keep_recent: usize,
}

impl FeedbackLedger {
    pub fn new(
        config: LedgerConfig,
        log: Arc<dyn AppendLog>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Arc<Self> {
        let (change_tx, _) = watch::channel(0);
        let (outcome_tx, _) = broadcast::channel(256);
        let ledger = Arc::new(Self {
            inner: RwLock::new(LedgerInner {
                rollup: RollupTable::new(config.ewma_half_life, config.min_sample_threshold),
                recent: VecDeque::new(),
                seen: HashSet::new(),
                known_plans: HashSet::new(),
                plan_order: VecDeque::new(),
            }),
            queue: Arc::new(PersistQueue {
                records: StdMutex::new(VecDeque::new()),
                capacity: config.queue_capacity.max(1),
                notify: Notify::new(),
                dropped: AtomicU64::new(0),
            }),
            log,
            snapshots,
            flush_lock: Mutex::new(()),
            last_offset: Arc::new(StdMutex::new(None)),
            duplicates: AtomicU64::new(0),
            change_counter: AtomicU64::new(0),
            change_tx,
            outcome_tx,
            writer: StdMutex::new(None),
            keep_recent: config.keep_recent,
        });

        let writer = {
            // Weak reference so the writer task never keeps the ledger
            // alive on its own.
            let weak = Arc::downgrade(&ledger);
            let queue = Arc::clone(&ledger.queue);
            tokio::spawn(async move {
                loop {
                    queue.notify.notified().await;
                    let Some(ledger) = weak.upgrade() else { break };
                    if let Err(err) = ledger.flush().await {
                        warn!(error = %err, "feedback persist flush failed");
                    }
                }
            })
        };
        *ledger.writer.lock().expect("writer lock poisoned") = Some(writer);
        ledger
    }

    /// Plans must be registered before their outcomes arrive; anything else
    /// is an orphan and rejected.
    pub async fn register_plan(&self, plan_id: Uuid) {
        let mut inner = self.inner.write().await;
        if inner.known_plans.insert(plan_id) {
            inner.plan_order.push_back(plan_id);
            if inner.plan_order.len() > KNOWN_PLAN_CAP {
                if let Some(evicted) = inner.plan_order.pop_front() {
                    inner.known_plans.remove(&evicted);
                }
            }
        }
    }

    /// Record one outcome. Idempotent on `(plan_id, provider, attempt)`;
    /// the rollup update is synchronous, persistence is fire-and-forget.
    pub async fn record(&self, outcome: Outcome) -> Result<(), CoreError> {
        {
            let mut inner = self.inner.write().await;
            if !inner.known_plans.contains(&outcome.plan_id) {
                return Err(CoreError::OrphanOutcome {
                    plan_id: outcome.plan_id,
                });
            }
            let key = (outcome.plan_id, outcome.provider.clone(), outcome.attempt);
            if !inner.seen.insert(key) {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(plan = %outcome.plan_id, provider = %outcome.provider, "duplicate outcome ignored");
                return Ok(());
            }

            inner.rollup.apply(&outcome);
            inner.recent.push_back(outcome.clone());
            if inner.recent.len() > self.keep_recent {
                inner.recent.pop_front();
            }
        }

        self.queue.push(LedgerRecord::from(&outcome));
        let _ = self.outcome_tx.send(outcome);
        let counter = self.change_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.change_tx.send(counter);
        Ok(())
    }

    /// Current rollup for one `(provider, bucket)` pair. O(1); returns a
    /// copy, never a reference into the live table.
    pub async fn stats(
        &self,
        provider: &ProviderId,
        bucket: FeatureBucket,
    ) -> Option<ProviderProfile> {
        self.inner.read().await.rollup.get(provider, bucket)
    }

    /// Providers that have any profile for `bucket`.
    pub async fn profiled_providers(&self, bucket: FeatureBucket) -> Vec<ProviderId> {
        self.inner.read().await.rollup.providers_for(bucket)
    }

    /// Most recent outcomes for diagnostics, newest last.
    pub async fn recent(&self, limit: usize, provider: Option<&ProviderId>) -> Vec<Outcome> {
        let inner = self.inner.read().await;
        let mut items: Vec<Outcome> = inner
            .recent
            .iter()
            .filter(|o| provider.map(|p| &o.provider == p).unwrap_or(true))
            .rev()
            .take(limit)
            .cloned()
            .collect();
        items.reverse();
        items
    }

    /// Records dropped on queue overflow.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Counter bumped on every accepted outcome; routers use it to refresh
    /// cached snapshots lazily.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.change_tx.subscribe()
    }

    /// Live stream of accepted outcomes; the scheduler's goal tracker
    /// listens here.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<Outcome> {
        self.outcome_tx.subscribe()
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let _guard = self.flush_lock.lock().await;
        for record in self.queue.drain() {
            let line = serde_json::to_string(&record)?;
            let offset = self.log.append(&line).await?;
            *self.last_offset.lock().expect("offset lock poisoned") = Some(offset);
        }
        Ok(())
    }

    /// Write a snapshot subsuming everything persisted so far, then compact
    /// the log.
    pub async fn snapshot(&self) -> anyhow::Result<()> {
        self.snapshot_with(None).await
    }

    /// Snapshot with an auxiliary state document (scheduler state rides the
    /// same durability cycle).
    pub async fn snapshot_with(&self, aux: Option<serde_json::Value>) -> anyhow::Result<()> {
        self.flush().await?;
        let offset = *self.last_offset.lock().expect("offset lock poisoned");
        let profiles = {
            let inner = self.inner.read().await;
            inner.rollup.export()
        };
        let value = serde_json::json!({
            "v": 1,
            "offset": offset,
            "profiles": profiles,
            "aux": aux,
        });
        self.snapshots.save(&value).await?;
        if let Some(offset) = offset {
            self.log.truncate_through(offset).await?;
        }
        debug!(?offset, profiles = profiles.len(), "feedback snapshot written");
        Ok(())
    }

    /// Load the latest snapshot and replay the log tail over it. Returns
    /// the auxiliary state document, when one was saved.
    pub async fn restore(&self) -> anyhow::Result<Option<serde_json::Value>> {
        let mut replay_from = 0;
        let mut aux = None;
        if let Some(value) = self.snapshots.load().await? {
            let profiles: Vec<ProviderProfile> =
                serde_json::from_value(value["profiles"].clone())?;
            if let Some(offset) = value["offset"].as_u64() {
                replay_from = offset + 1;
                *self.last_offset.lock().expect("offset lock poisoned") = Some(offset);
            }
            if !value["aux"].is_null() {
                aux = Some(value["aux"].clone());
            }
            let mut inner = self.inner.write().await;
            inner.rollup.import(profiles);
        }

        let tail = self.log.read_from(replay_from).await?;
        let mut inner = self.inner.write().await;
        for (offset, line) in tail {
            let record: LedgerRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(err) => {
                    warn!(offset, error = %err, "skipping malformed ledger record");
                    continue;
                }
            };
            match record.to_outcome() {
                Ok(outcome) => {
                    // Replay bypasses orphan checks: the plan registry is
                    // process-lived and these outcomes were accepted once.
                    inner.seen.insert((outcome.plan_id, outcome.provider.clone(), outcome.attempt));
                    inner.rollup.apply(&outcome);
                    inner.recent.push_back(outcome);
                    if inner.recent.len() > self.keep_recent {
                        inner.recent.pop_front();
                    }
                }
                Err(reason) => warn!(offset, reason, "skipping unreadable ledger record"),
            }
            *self.last_offset.lock().expect("offset lock poisoned") = Some(offset);
        }
        Ok(aux)
    }

    /// Flush everything still queued. Part of the shutdown sequence.
    pub async fn drain(&self) -> anyhow::Result<()> {
        self.flush().await
    }
}

impl Drop for FeedbackLedger {
    fn drop(&mut self) {
        if let Some(handle) = self
            .writer
            .lock()
            .expect("writer lock poisoned")
            .take()
        {
            handle.abort();
        }
    }
}
