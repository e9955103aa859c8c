//! Exponential backoff with full jitter for provider retries.

use std::sync::Arc;
use std::time::Duration;

use common::clock::RngSource;

/// Delay schedule: `base * 2^attempt`, capped, with full jitter (a uniform
/// draw in `[0, capped_delay]`).
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry number `attempt` (0-based: the delay after the
    /// first failure is `delay_for(0)`).
    pub fn delay_for(&self, attempt: u32, rng: &Arc<dyn RngSource>) -> Duration {
        let exp = self
            .base
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.cap);
        exp.mul_f64(rng.next_f64())
    }

    /// Upper bound of the jittered delay; used by tests.
    pub fn max_delay_for(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::clock::SeededRng;

    #[test]
    fn delays_double_then_cap() {
        let policy = BackoffPolicy::new(Duration::from_millis(200), Duration::from_secs(3));
        assert_eq!(policy.max_delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.max_delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.max_delay_for(2), Duration::from_millis(800));
        assert_eq!(policy.max_delay_for(10), Duration::from_secs(3));
    }

    #[test]
    fn jittered_delay_stays_under_bound() {
        let policy = BackoffPolicy::new(Duration::from_millis(200), Duration::from_secs(3));
        let rng: Arc<dyn RngSource> = Arc::new(SeededRng::new(9));
        for attempt in 0..6 {
            let delay = policy.delay_for(attempt, &rng);
            assert!(delay <= policy.max_delay_for(attempt));
        }
    }
}
