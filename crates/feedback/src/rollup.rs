//! Per-`(provider, bucket)` rollups updated incrementally on each outcome.
//!
//! Rolling metrics are exponentially weighted moving averages with a
//! half-life measured in attempts. Q-values blend a global prior while a
//! profile has fewer than `min_sample_threshold` attempts, so cold start
//! does not lock the policy to whichever provider was tried first.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use domain::features::FeatureBucket;
use domain::outcome::Outcome;
use domain::provider::ProviderId;

/// EWMA over a fixed half-life in samples. The first sample seeds the
/// average directly so early values are unbiased.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ewma {
    value: f64,
    alpha: f64,
    primed: bool,
}

impl Ewma {
    pub fn with_half_life(half_life: u32) -> Self {
        let half_life = half_life.max(1);
        Self {
            value: 0.0,
            alpha: 1.0 - 0.5_f64.powf(1.0 / f64::from(half_life)),
            primed: false,
        }
    }

    pub fn update(&mut self, sample: f64) {
        if self.primed {
            self.value += self.alpha * (sample - self.value);
        } else {
            self.value = sample;
            self.primed = true;
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub provider: ProviderId,
    pub bucket: FeatureBucket,
    pub attempts: u64,
    pub successes: u64,
    pub rolling_success: Ewma,
    pub rolling_latency_ms: Ewma,
    pub rolling_cost: Ewma,
    /// Last computed q-value; refreshed on read against the current prior.
    pub q_value: f64,
    pub last_updated_ms: u64,
}

impl ProviderProfile {
    fn new(provider: ProviderId, bucket: FeatureBucket, half_life: u32) -> Self {
        Self {
            provider,
            bucket,
            attempts: 0,
            successes: 0,
            rolling_success: Ewma::with_half_life(half_life),
            rolling_latency_ms: Ewma::with_half_life(half_life),
            rolling_cost: Ewma::with_half_life(half_life),
            q_value: 0.0,
            last_updated_ms: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        self.rolling_success.value()
    }

    pub fn latency_ms(&self) -> f64 {
        self.rolling_latency_ms.value()
    }

    pub fn cost(&self) -> f64 {
        self.rolling_cost.value()
    }

    /// Routing confidence: success rate discounted by sample sufficiency.
    pub fn confidence(&self, min_sample_threshold: u32) -> f64 {
        let sufficiency = if min_sample_threshold == 0 {
            1.0
        } else {
            (self.attempts as f64 / f64::from(min_sample_threshold)).min(1.0)
        };
        self.success_rate() * sufficiency
    }
}

#[derive(Debug)]
pub struct RollupTable {
    profiles: HashMap<(ProviderId, FeatureBucket), ProviderProfile>,
    half_life: u32,
    min_sample_threshold: u32,
}

impl RollupTable {
    pub fn new(half_life: u32, min_sample_threshold: u32) -> Self {
        Self {
            profiles: HashMap::new(),
            half_life,
            min_sample_threshold,
        }
    }

    /// Apply one outcome. Synchronous and in-memory; never fails.
    pub fn apply(&mut self, outcome: &Outcome) {
        let key = (outcome.provider.clone(), outcome.bucket);
        let half_life = self.half_life;
        let profile = self
            .profiles
            .entry(key)
            .or_insert_with(|| ProviderProfile::new(outcome.provider.clone(), outcome.bucket, half_life));

        profile.attempts += 1;
        if outcome.success {
            profile.successes += 1;
        }
        profile
            .rolling_success
            .update(if outcome.success { 1.0 } else { 0.0 });
        profile.rolling_latency_ms.update(outcome.latency_ms as f64);
        profile.rolling_cost.update(outcome.cost_usd);
        profile.last_updated_ms = outcome.ts_ms;

        let prior = self.global_prior();
        if let Some(profile) = self
            .profiles
            .get_mut(&(outcome.provider.clone(), outcome.bucket))
        {
            profile.q_value = Self::blended_q(profile, prior, self.min_sample_threshold);
        }
    }

    /// Cloned profile with its q-value refreshed against the current prior.
    pub fn get(&self, provider: &ProviderId, bucket: FeatureBucket) -> Option<ProviderProfile> {
        let profile = self.profiles.get(&(provider.clone(), bucket))?;
        let mut copy = profile.clone();
        copy.q_value = Self::blended_q(&copy, self.global_prior(), self.min_sample_threshold);
        Some(copy)
    }

    pub fn providers_for(&self, bucket: FeatureBucket) -> Vec<ProviderId> {
        self.profiles
            .keys()
            .filter(|(_, b)| *b == bucket)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn set_min_sample_threshold(&mut self, threshold: u32) {
        self.min_sample_threshold = threshold;
    }

    /// Mean rolling success over every profile; 0.5 with no data.
    fn global_prior(&self) -> f64 {
        if self.profiles.is_empty() {
            return 0.5;
        }
        let sum: f64 = self.profiles.values().map(|p| p.success_rate()).sum();
        sum / self.profiles.len() as f64
    }

    fn blended_q(profile: &ProviderProfile, prior: f64, threshold: u32) -> f64 {
        if threshold == 0 {
            return profile.success_rate();
        }
        let weight = (profile.attempts as f64 / f64::from(threshold)).min(1.0);
        weight * profile.success_rate() + (1.0 - weight) * prior
    }

    pub fn export(&self) -> Vec<ProviderProfile> {
        let mut profiles: Vec<ProviderProfile> = self.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| (&a.provider, a.bucket).cmp(&(&b.provider, b.bucket)));
        profiles
    }

    pub fn import(&mut self, profiles: Vec<ProviderProfile>) {
        self.profiles = profiles
            .into_iter()
            .map(|p| ((p.provider.clone(), p.bucket), p))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::features::{Complexity, TaskDomain};
    use uuid::Uuid;

    fn bucket() -> FeatureBucket {
        FeatureBucket::new(TaskDomain::Code, Complexity::Complex)
    }

    fn outcome(provider: &str, success: bool, latency_ms: u64) -> Outcome {
        if success {
            Outcome::success(
                Uuid::new_v4(),
                ProviderId::new(provider),
                bucket(),
                latency_ms,
                0.001,
                0.9,
                0,
            )
        } else {
            Outcome::failure(
                Uuid::new_v4(),
                ProviderId::new(provider),
                bucket(),
                latency_ms,
                common::errors::OutcomeErrorKind::Server,
                0,
            )
        }
    }

    #[test]
    fn first_sample_seeds_ewma_directly() {
        let mut table = RollupTable::new(20, 5);
        table.apply(&outcome("p1", true, 200));
        let profile = table.get(&ProviderId::new("p1"), bucket()).unwrap();
        assert_eq!(profile.success_rate(), 1.0);
        assert_eq!(profile.latency_ms(), 200.0);
    }

    #[test]
    fn ewma_converges_to_steady_rate() {
        let mut table = RollupTable::new(20, 0);
        // 70% success stream, long enough for convergence (5 half-lives).
        for i in 0..1_000 {
            table.apply(&outcome("p1", i % 10 < 7, 100));
        }
        let profile = table.get(&ProviderId::new("p1"), bucket()).unwrap();
        assert!((profile.success_rate() - 0.7).abs() < 0.1);
    }

    #[test]
    fn cold_start_blends_toward_global_prior() {
        let mut table = RollupTable::new(20, 5);
        // A mediocre well-sampled provider anchors the global prior.
        for i in 0..20 {
            table.apply(&outcome("veteran", i % 2 == 0, 100));
        }
        // One lucky sample must not be taken at face value.
        table.apply(&outcome("rookie", true, 50));

        let rookie = table.get(&ProviderId::new("rookie"), bucket()).unwrap();
        assert!(
            rookie.q_value < rookie.success_rate(),
            "raw 1.0 success rate is discounted toward the prior"
        );
        assert!(rookie.q_value > 0.5, "prior keeps the rookie plausible");
    }

    #[test]
    fn zero_threshold_disables_prior() {
        let mut table = RollupTable::new(20, 0);
        table.apply(&outcome("p1", true, 100));
        let profile = table.get(&ProviderId::new("p1"), bucket()).unwrap();
        assert_eq!(profile.q_value, 1.0);
    }

    #[test]
    fn confidence_scales_with_samples() {
        let mut table = RollupTable::new(20, 5);
        table.apply(&outcome("p1", true, 100));
        let profile = table.get(&ProviderId::new("p1"), bucket()).unwrap();
        assert!((profile.confidence(5) - 0.2).abs() < 1e-9);

        for _ in 0..4 {
            table.apply(&outcome("p1", true, 100));
        }
        let profile = table.get(&ProviderId::new("p1"), bucket()).unwrap();
        assert!((profile.confidence(5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn export_import_roundtrip() {
        let mut table = RollupTable::new(20, 5);
        table.apply(&outcome("p1", true, 100));
        table.apply(&outcome("p2", false, 900));

        let mut restored = RollupTable::new(20, 5);
        restored.import(table.export());
        assert_eq!(restored.len(), 2);
        let p2 = restored.get(&ProviderId::new("p2"), bucket()).unwrap();
        assert_eq!(p2.attempts, 1);
        assert_eq!(p2.successes, 0);
    }
}
