//! Retry pacing for producers facing a full ring buffer.

use lockstep_core::BackoffConfig;
use std::time::Duration;

/// Exponential backoff, reset after every successful transfer.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial(),
            config,
        }
    }

    /// Sleep to take before the next attempt; grows up to the configured max.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .saturating_mul(self.config.factor)
            .min(self.config.max());
        delay
    }

    /// Block the calling thread for the next delay.
    pub fn snooze(&mut self) {
        std::thread::sleep(self.next_delay());
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_to_max_and_resets() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial_us: 1_000,
            max_us: 5_000,
            factor: 2,
        });

        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2));
        assert_eq!(backoff.next_delay(), Duration::from_millis(4));
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
    }

    #[test]
    fn test_factor_one_is_constant() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial_us: 300,
            max_us: 300,
            factor: 1,
        });
        assert_eq!(backoff.next_delay(), Duration::from_micros(300));
        assert_eq!(backoff.next_delay(), Duration::from_micros(300));
    }
}
