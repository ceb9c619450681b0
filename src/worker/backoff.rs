use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Exponential backoff with random jitter.
///
/// Each call to [`next_delay`](Self::next_delay) returns the current delay
/// and grows the next one by `multiplier`, capped at `max_delay_ms`.
/// [`reset`](Self::reset) goes back to the initial delay after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, without jitter.
    pub fn base_delay(&self) -> Duration {
        let initial = self.config.initial_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let exponent = self.attempt.min(i32::MAX as u32) as i32;
        let delay = (initial * self.config.multiplier.max(1.0).powi(exponent)).min(max);
        Duration::from_millis(delay as u64)
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);

        if self.config.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..self.config.jitter);
        base.mul_f64(factor)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: f64) -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter,
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let mut backoff = Backoff::new(config(0.0));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = Backoff::new(config(0.0));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(config(0.5));
        for _ in 0..50 {
            let base = backoff.base_delay();
            let delay = backoff.next_delay();
            assert!(delay >= base);
            assert!(delay <= base.mul_f64(1.5));
        }
    }

    #[test]
    fn fixed_config_never_grows() {
        let mut backoff = Backoff::new(BackoffConfig::fixed(25));
        for _ in 0..10 {
            assert_eq!(backoff.next_delay(), Duration::from_millis(25));
        }
    }

    #[test]
    fn huge_attempt_count_does_not_overflow() {
        let mut backoff = Backoff::new(config(0.0));
        backoff.attempt = u32::MAX;
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
        assert_eq!(backoff.attempt(), u32::MAX);
    }
}
