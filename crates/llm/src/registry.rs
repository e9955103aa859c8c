//! Thread-safe provider registry with a small per-provider health machine:
//!
//! ```text
//! Healthy → Degraded (1–2 recent transient fails)
//!         → Cooling  (3 consecutive; exponential cooldown, capped 5 min)
//!         → Healthy  (first success after cooldown)
//! any     → Disabled (permanent failure; operator re-enables)
//! ```
//!
//! Cooling providers stay visible to diagnostics but are only handed back
//! to routing once their cooldown has elapsed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use common::clock::Clock;
use common::event_bus::ControlBus;
use common::events::ControlEvent;
use domain::contracts::ProviderAdapter;
use domain::provider::{Capability, CostModel, HealthSnapshot, HealthState, Provider, ProviderId};

const COOLDOWN_BASE_MS: u64 = 5_000;
const COOLDOWN_CAP_MS: u64 = 300_000;
const COOLING_THRESHOLD: u32 = 3;

/// Registration input: everything but health, which starts `Healthy`.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub display_name: String,
    pub default_model: String,
    pub capabilities: BTreeSet<Capability>,
    pub cost_model: CostModel,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    Success,
    TransientFail,
    PermanentFail,
}

struct ProviderEntry {
    descriptor: ProviderDescriptor,
    adapter: Arc<dyn ProviderAdapter>,
    state: HealthState,
    consecutive_failures: u32,
    cooldown_until_ms: Option<u64>,
    /// Doubles the next cooldown; reset on success.
    cooldown_round: u32,
}

impl ProviderEntry {
    fn snapshot(&self, now_ms: u64) -> Provider {
        Provider {
            id: self.descriptor.id.clone(),
            display_name: self.descriptor.display_name.clone(),
            default_model: self.descriptor.default_model.clone(),
            capabilities: self.descriptor.capabilities.clone(),
            cost_model: self.descriptor.cost_model,
            health: HealthSnapshot {
                state: self.state,
                available: self.routable(now_ms),
                consecutive_failures: self.consecutive_failures,
                cooldown_until_ms: self.cooldown_until_ms,
            },
            priority: self.descriptor.priority,
        }
    }

    fn routable(&self, now_ms: u64) -> bool {
        match self.state {
            HealthState::Healthy | HealthState::Degraded => true,
            HealthState::Cooling => self
                .cooldown_until_ms
                .map(|until| now_ms >= until)
                .unwrap_or(false),
            HealthState::Disabled => false,
        }
    }
}

/// Registry statistics for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStatistics {
    pub total: usize,
    pub available: usize,
    pub degraded: usize,
    pub cooling: usize,
    pub disabled: usize,
}

pub struct ProviderRegistry {
    entries: RwLock<HashMap<ProviderId, ProviderEntry>>,
    bus: ControlBus,
    clock: Arc<dyn Clock>,
}

impl ProviderRegistry {
    pub fn new(bus: ControlBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            bus,
            clock,
        }
    }

    pub async fn register(&self, descriptor: ProviderDescriptor, adapter: Arc<dyn ProviderAdapter>) {
        info!(provider = %descriptor.id, "registering provider");
        let entry = ProviderEntry {
            descriptor,
            adapter,
            state: HealthState::Healthy,
            consecutive_failures: 0,
            cooldown_until_ms: None,
            cooldown_round: 0,
        };
        self.entries
            .write()
            .await
            .insert(entry.descriptor.id.clone(), entry);
    }

    /// Every known provider, including cooling and disabled ones.
    pub async fn list(&self) -> Vec<Provider> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;
        let mut providers: Vec<Provider> = entries.values().map(|e| e.snapshot(now)).collect();
        providers.sort_by(|a, b| a.id.cmp(&b.id));
        providers
    }

    pub async fn get(&self, id: &ProviderId) -> Option<Provider> {
        let now = self.clock.now_ms();
        self.entries.read().await.get(id).map(|e| e.snapshot(now))
    }

    pub async fn adapter(&self, id: &ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| Arc::clone(&e.adapter))
    }

    /// Routable providers whose capability set covers `required`, ordered
    /// by priority (highest first) then blended cost (cheapest first).
    /// Never fails; an empty result is the caller's `NoProviderAvailable`.
    pub async fn available_for(&self, required: &BTreeSet<Capability>) -> Vec<Provider> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;
        let mut matching: Vec<Provider> = entries
            .values()
            .filter(|e| e.routable(now))
            .map(|e| e.snapshot(now))
            .filter(|p| p.supports(required))
            .collect();
        matching.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then(
                a.cost_model
                    .blended_per_1k()
                    .partial_cmp(&b.cost_model.blended_per_1k())
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        matching
    }

    /// Cheapest healthy chat-capable provider: the routing fallback when
    /// the candidate set is empty.
    pub async fn cheapest_chat(&self) -> Option<Provider> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|e| e.state == HealthState::Healthy && e.routable(now))
            .map(|e| e.snapshot(now))
            .filter(|p| p.capabilities.contains(&Capability::Chat))
            .min_by(|a, b| {
                a.cost_model
                    .blended_per_1k()
                    .partial_cmp(&b.cost_model.blended_per_1k())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Absorb a health report from the execution engine.
    pub async fn report(&self, id: &ProviderId, event: HealthEvent) {
        let transition = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(id) else {
                warn!(provider = %id, "health report for unknown provider");
                return;
            };
            let before = entry.state;
            match event {
                HealthEvent::Success => {
                    entry.consecutive_failures = 0;
                    entry.cooldown_until_ms = None;
                    entry.cooldown_round = 0;
                    if entry.state != HealthState::Disabled {
                        entry.state = HealthState::Healthy;
                    }
                }
                HealthEvent::TransientFail => {
                    entry.consecutive_failures += 1;
                    if entry.state != HealthState::Disabled {
                        if entry.consecutive_failures >= COOLING_THRESHOLD {
                            let cooldown = (COOLDOWN_BASE_MS << entry.cooldown_round.min(10))
                                .min(COOLDOWN_CAP_MS);
                            entry.cooldown_until_ms = Some(self.clock.now_ms() + cooldown);
                            entry.cooldown_round = entry.cooldown_round.saturating_add(1);
                            entry.state = HealthState::Cooling;
                            debug!(provider = %id, cooldown_ms = cooldown, "provider entering cooldown");
                        } else {
                            entry.state = HealthState::Degraded;
                        }
                    }
                }
                HealthEvent::PermanentFail => {
                    entry.state = HealthState::Disabled;
                    entry.cooldown_until_ms = None;
                }
            }
            (before != entry.state).then(|| (before, entry.state))
        };

        if let Some((from, to)) = transition {
            info!(provider = %id, from = from.as_str(), to = to.as_str(), "provider health changed");
            self.bus
                .publish(ControlEvent::ProviderHealthChanged {
                    id: id.to_string(),
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                })
                .await;
        }
    }

    /// Operator control. Re-enabling resets the health machine.
    pub async fn set_enabled(&self, id: &ProviderId, enabled: bool) {
        let transition = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            let before = entry.state;
            if enabled {
                entry.state = HealthState::Healthy;
                entry.consecutive_failures = 0;
                entry.cooldown_until_ms = None;
                entry.cooldown_round = 0;
            } else {
                entry.state = HealthState::Disabled;
            }
            (before != entry.state).then(|| (before, entry.state))
        };
        if let Some((from, to)) = transition {
            self.bus
                .publish(ControlEvent::ProviderHealthChanged {
                    id: id.to_string(),
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                })
                .await;
        }
    }

    pub async fn statistics(&self) -> RegistryStatistics {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;
        let mut stats = RegistryStatistics {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries.values() {
            if entry.routable(now) {
                stats.available += 1;
            }
            match entry.state {
                HealthState::Degraded => stats.degraded += 1,
                HealthState::Cooling => stats.cooling += 1,
                HealthState::Disabled => stats.disabled += 1,
                HealthState::Healthy => {}
            }
        }
        stats
    }
}
