//! Backoff delays between attempts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::Duration;

/// Produces the wait before the next attempt.
pub trait BackoffPolicy: Send + Sync + fmt::Debug {
    /// Returns a fresh copy in its initial state.
    fn clone_box(&self) -> Box<dyn BackoffPolicy>;

    /// Records a completed attempt and returns the delay before the next.
    fn on_completion(&mut self) -> Duration;
}

impl Clone for Box<dyn BackoffPolicy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Exponential backoff with full jitter.
///
/// Each delay is drawn uniformly from `[initial_delay, current]`, after
/// which `current` grows by `scaling` up to `maximum_delay`. Every instance
/// seeds its own generator, so two clones never share a jitter sequence.
#[derive(Debug)]
pub struct ExponentialBackoffPolicy {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
    current_delay: Duration,
    rng: StdRng,
}

impl ExponentialBackoffPolicy {
    /// Creates a policy. `maximum_delay` is raised to `initial_delay` and
    /// `scaling` to 1.0 if given smaller.
    pub fn new(initial_delay: Duration, maximum_delay: Duration, scaling: f64) -> Self {
        Self::with_rng(initial_delay, maximum_delay, scaling, StdRng::from_entropy())
    }

    /// Creates a policy with a fixed jitter seed.
    pub fn with_seed(
        initial_delay: Duration,
        maximum_delay: Duration,
        scaling: f64,
        seed: u64,
    ) -> Self {
        Self::with_rng(
            initial_delay,
            maximum_delay,
            scaling,
            StdRng::seed_from_u64(seed),
        )
    }

    fn with_rng(initial_delay: Duration, maximum_delay: Duration, scaling: f64, rng: StdRng) -> Self {
        let scaling = if scaling.is_finite() { scaling.max(1.0) } else { 1.0 };
        Self {
            initial_delay,
            maximum_delay: maximum_delay.max(initial_delay),
            scaling,
            current_delay: initial_delay,
            rng,
        }
    }

    /// Smallest delay ever returned.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Largest delay ever returned.
    pub fn maximum_delay(&self) -> Duration {
        self.maximum_delay
    }
}

impl BackoffPolicy for ExponentialBackoffPolicy {
    fn clone_box(&self) -> Box<dyn BackoffPolicy> {
        Box::new(Self::new(
            self.initial_delay,
            self.maximum_delay,
            self.scaling,
        ))
    }

    fn on_completion(&mut self) -> Duration {
        let upper = self.current_delay.clamp(self.initial_delay, self.maximum_delay);
        let delay = if upper > self.initial_delay {
            self.rng.gen_range(self.initial_delay..=upper)
        } else {
            self.initial_delay
        };

        let grown = self.current_delay.as_secs_f64() * self.scaling;
        self.current_delay = if grown >= self.maximum_delay.as_secs_f64() {
            self.maximum_delay
        } else {
            Duration::from_secs_f64(grown)
        };
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_bounds() {
        let min = Duration::from_millis(10);
        let max = Duration::from_millis(500);
        let mut policy = ExponentialBackoffPolicy::new(min, max, 2.0);

        for _ in 0..100 {
            let delay = policy.on_completion();
            assert!(delay >= min, "{delay:?} below minimum");
            assert!(delay <= max, "{delay:?} above maximum");
        }
    }

    #[test]
    fn first_delay_is_initial() {
        let mut policy = ExponentialBackoffPolicy::new(
            Duration::from_millis(10),
            Duration::from_secs(1),
            2.0,
        );
        assert_eq!(policy.on_completion(), Duration::from_millis(10));
    }

    #[test]
    fn clone_resets_growth() {
        let mut policy = ExponentialBackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_secs(10),
            10.0,
        );
        for _ in 0..5 {
            policy.on_completion();
        }
        let mut fresh = policy.clone_box();
        assert_eq!(fresh.on_completion(), Duration::from_millis(1));
    }

    #[test]
    fn independent_instances_diverge() {
        let build = || {
            ExponentialBackoffPolicy::new(Duration::from_millis(1), Duration::from_secs(60), 2.0)
        };
        let mut a = build();
        let mut b = build();
        let sequence_a: Vec<_> = (0..32).map(|_| a.on_completion()).collect();
        let sequence_b: Vec<_> = (0..32).map(|_| b.on_completion()).collect();
        assert_ne!(sequence_a, sequence_b);
    }

    #[test]
    fn seeded_instances_repeat() {
        let build = || {
            ExponentialBackoffPolicy::with_seed(
                Duration::from_millis(1),
                Duration::from_secs(60),
                2.0,
                7,
            )
        };
        let mut a = build();
        let mut b = build();
        for _ in 0..16 {
            assert_eq!(a.on_completion(), b.on_completion());
        }
    }

    #[test]
    fn invalid_parameters_are_clamped() {
        let mut policy = ExponentialBackoffPolicy::new(
            Duration::from_millis(50),
            Duration::from_millis(10),
            0.5,
        );
        assert_eq!(policy.maximum_delay(), Duration::from_millis(50));
        assert_eq!(policy.on_completion(), Duration::from_millis(50));
        assert_eq!(policy.on_completion(), Duration::from_millis(50));
    }
}
