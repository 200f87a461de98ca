use std::time::Duration;

use rand::{Rng, rng};

/// Exponential delay for the given attempt: `min(base * 2^attempt, cap)`.
///
/// Saturates instead of overflowing for large attempt counts.
pub fn compute_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Exponential backoff with an optional random jitter added on top of the capped delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound of the exponential part.
    pub cap: Duration,
    /// Maximum random addition; zero disables jitter.
    pub jitter: Duration,
}

impl BackoffPolicy {
    /// Build a jitter-free policy.
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: Duration::ZERO,
        }
    }

    /// Add up to `jitter` of random delay to every computed delay.
    pub const fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Same policy with jitter disabled, for deterministic schedules.
    pub const fn without_jitter(self) -> Self {
        self.with_jitter(Duration::ZERO)
    }

    /// Deterministic part of the delay for `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        compute_delay(attempt, self.base, self.cap)
    }

    /// Delay to wait before the retry following `attempt` failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return delay;
        }
        delay.saturating_add(Duration::from_millis(rng().random_range(0..jitter_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(400);
    const CAP: Duration = Duration::from_secs(30);

    #[test]
    fn doubles_from_base() {
        assert_eq!(compute_delay(0, BASE, CAP), Duration::from_millis(400));
        assert_eq!(compute_delay(1, BASE, CAP), Duration::from_millis(800));
        assert_eq!(compute_delay(3, BASE, CAP), Duration::from_millis(3_200));
    }

    #[test]
    fn never_exceeds_cap_and_never_decreases() {
        let mut previous = Duration::ZERO;
        for attempt in 0..80 {
            let delay = compute_delay(attempt, BASE, CAP);
            assert!(delay <= CAP, "attempt {attempt} exceeded cap: {delay:?}");
            assert!(delay >= previous, "attempt {attempt} decreased");
            previous = delay;
        }
        assert_eq!(previous, CAP);
    }

    #[test]
    fn huge_attempts_saturate_at_cap() {
        assert_eq!(compute_delay(u32::MAX, BASE, CAP), CAP);
        assert_eq!(
            compute_delay(40, Duration::from_secs(u64::MAX / 2), Duration::MAX),
            Duration::MAX
        );
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = BackoffPolicy::new(BASE, CAP).with_jitter(Duration::from_millis(150));
        for _ in 0..200 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay < Duration::from_millis(950));
        }
    }

    #[test]
    fn disabled_jitter_is_deterministic() {
        let policy = BackoffPolicy::new(BASE, CAP)
            .with_jitter(Duration::from_millis(150))
            .without_jitter();
        assert_eq!(policy.delay(2), Duration::from_millis(1_600));
    }
}
