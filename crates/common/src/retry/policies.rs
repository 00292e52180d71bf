use std::time::Duration;

use rand::{rngs::SmallRng, Rng, SeedableRng};

/// Default per-attempt timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default growth factor between attempts.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default symmetric jitter fraction.
pub const DEFAULT_JITTER: f64 = 0.1;

/// Default upper bound on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Default deadline for a whole retry operation.
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Exponential backoff descriptor with symmetric jitter.
///
/// Immutable once built. The jitter source is a non-cryptographic [`SmallRng`] seeded per
/// call; this only spreads retries out, it is not a security boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    call_timeout: Duration,
    base_delay: Duration,
    multiplier: f64,
    jitter: f64,
    max_delay: Duration,
    overall_timeout: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            base_delay: DEFAULT_BASE_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: DEFAULT_JITTER,
            max_delay: DEFAULT_MAX_DELAY,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
        }
    }
}

impl ExponentialBackoff {
    /// Creates a new policy.
    ///
    /// A multiplier below 1 is raised to 1 and the jitter fraction is clamped into `[0, 1]`.
    pub fn new(
        call_timeout: Duration,
        base_delay: Duration,
        multiplier: f64,
        jitter: f64,
        max_delay: Duration,
        overall_timeout: Duration,
    ) -> Self {
        let multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            DEFAULT_MULTIPLIER
        };
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            call_timeout,
            base_delay,
            multiplier,
            jitter,
            max_delay,
            overall_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn overall_timeout(&self) -> Duration {
        self.overall_timeout
    }

    /// Returns a copy with a different overall deadline.
    pub fn with_overall_timeout(mut self, overall_timeout: Duration) -> Self {
        self.overall_timeout = overall_timeout;
        self
    }

    /// Returns a copy with a different per-attempt timeout.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Delay before the next attempt, before jitter is applied.
    fn raw_delay_secs(&self, attempt: u32) -> f64 {
        let cap = self.max_delay.as_secs_f64();
        let mut delay = self.base_delay.as_secs_f64().min(cap);
        for _ in 0..attempt {
            delay = (delay * self.multiplier).min(cap);
            if delay >= cap {
                break;
            }
        }
        delay
    }

    /// Computes the backoff delay after `attempt` failed attempts.
    ///
    /// Attempt 0 yields the base delay exactly. Later attempts grow geometrically up to the
    /// cap and then get `±jitter` applied. The result always lies in `[0, max_delay]`.
    pub fn compute_backoff(&self, attempt: u32) -> Duration {
        let mut rng = SmallRng::from_entropy();
        self.compute_backoff_with(attempt, &mut rng)
    }

    /// Same as [`Self::compute_backoff`] with a caller-provided random source.
    pub fn compute_backoff_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let cap = self.max_delay.as_secs_f64();
        let delay = self.raw_delay_secs(attempt);

        let jittered = if attempt == 0 || self.jitter == 0.0 {
            delay
        } else {
            let spread = delay * self.jitter;
            delay + rng.gen_range(-spread..=spread)
        };

        Duration::from_secs_f64(jittered.clamp(0.0, cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, multiplier: f64, jitter: f64, cap_ms: u64) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(base_ms),
            multiplier,
            jitter,
            Duration::from_millis(cap_ms),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_first_attempt_is_base_delay() {
        let p = policy(100, 2.0, 0.5, 10_000);
        for _ in 0..32 {
            assert_eq!(p.compute_backoff(0), Duration::from_millis(100));
        }
    }

    #[test]
    fn test_growth_without_jitter() {
        let p = policy(100, 2.0, 0.0, 10_000);
        assert_eq!(p.compute_backoff(1), Duration::from_millis(200));
        assert_eq!(p.compute_backoff(2), Duration::from_millis(400));
        assert_eq!(p.compute_backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped() {
        let p = policy(100, 2.0, 0.0, 1_000);
        assert_eq!(p.compute_backoff(10), Duration::from_millis(1_000));
        assert_eq!(p.compute_backoff(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_delay_always_within_bounds() {
        let p = policy(100, 3.0, 1.0, 2_000);
        let cap = Duration::from_millis(2_000);
        for attempt in 0..40 {
            for _ in 0..16 {
                let d = p.compute_backoff(attempt);
                assert!(d <= cap, "attempt {attempt} gave {d:?}");
            }
        }
    }

    #[test]
    fn test_jitter_stays_within_fraction() {
        let p = policy(1_000, 1.0, 0.2, 10_000);
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..256 {
            let d = p.compute_backoff_with(1, &mut rng).as_secs_f64();
            assert!((0.8..=1.2).contains(&d), "{d}");
        }
    }

    #[test]
    fn test_base_above_cap_is_clamped() {
        let p = policy(5_000, 2.0, 0.0, 1_000);
        assert_eq!(p.compute_backoff(0), Duration::from_millis(1_000));
    }

    #[test]
    fn test_constructor_sanitizes_inputs() {
        let p = policy(100, 0.5, 3.0, 1_000);
        assert_eq!(p.multiplier(), 1.0);
        assert_eq!(p.jitter(), 1.0);

        let p = policy(100, f64::NAN, f64::INFINITY, 1_000);
        assert_eq!(p.multiplier(), DEFAULT_MULTIPLIER);
        assert_eq!(p.jitter(), 0.0);
    }
}
