//! Outcome records: the unit of learning. One immutable record per
//! provider attempt, appended to the feedback ledger.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::FeatureBucket;
use crate::provider::ProviderId;
use common::errors::OutcomeErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub plan_id: Uuid,
    pub provider: ProviderId,
    pub bucket: FeatureBucket,
    /// Attempt sequence within the plan. Retries and synthesizer calls get
    /// fresh numbers; replays of the same attempt are deduplicated.
    pub attempt: u32,
    pub success: bool,
    /// Caller or scorer rating in `[0, 1]`.
    pub rating: f64,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub quality_score: f64,
    pub error_kind: Option<OutcomeErrorKind>,
    pub ts_ms: u64,
}

impl Outcome {
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn success(
        plan_id: Uuid,
        provider: ProviderId,
        bucket: FeatureBucket,
        latency_ms: u64,
        cost_usd: f64,
        quality_score: f64,
        ts_ms: u64,
    ) -> Self {
        Self {
            plan_id,
            provider,
            bucket,
            attempt: 0,
            success: true,
            rating: quality_score,
            latency_ms,
            cost_usd,
            quality_score,
            error_kind: None,
            ts_ms,
        }
    }

    pub fn failure(
        plan_id: Uuid,
        provider: ProviderId,
        bucket: FeatureBucket,
        latency_ms: u64,
        error_kind: OutcomeErrorKind,
        ts_ms: u64,
    ) -> Self {
        Self {
            plan_id,
            provider,
            bucket,
            attempt: 0,
            success: false,
            rating: 0.0,
            latency_ms,
            cost_usd: 0.0,
            quality_score: 0.0,
            error_kind: Some(error_kind),
            ts_ms,
        }
    }
}
