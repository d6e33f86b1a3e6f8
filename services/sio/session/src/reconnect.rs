//! Reconnect backoff.

use rand::Rng;
use std::time::Duration;

/// Smallest delay a policy will hand out
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1);

/// Exponential reconnect delay, clamped to `[min_delay, max_delay]`.
///
/// `delay(n) = min(max_delay, min_delay * 2^n)` where `n` counts consecutive
/// failed attempts since the last successful connect.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    min_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Create a policy; `min` is at least [`MIN_RECONNECT_DELAY`] and `max`
    /// is raised to `min` when misconfigured
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(MIN_RECONNECT_DELAY);
        Self {
            min_delay: min,
            max_delay: max.max(min),
            jitter: false,
            attempt: 0,
        }
    }

    /// Randomize each delay within +/-25%, still inside the bounds
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before attempt number `attempt` (0-based), without jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let scaled = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.min_delay.checked_mul(factor))
            .unwrap_or(self.max_delay);

        scaled.clamp(self.min_delay, self.max_delay)
    }

    /// Delay for the current attempt, then advance the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let base = self.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if !self.jitter {
            return base;
        }

        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        base.mul_f64(factor).clamp(self.min_delay, self.max_delay)
    }

    /// Back to the first delay after a successful connect
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failed attempts so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Lower bound
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Upper bound
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_doubles_until_clamped() {
        let mut policy = ReconnectPolicy::new(ms(100), ms(2000));

        let delays: Vec<_> = (0..6).map(|_| policy.next_delay()).collect();
        assert_eq!(
            delays,
            vec![ms(100), ms(200), ms(400), ms(800), ms(1600), ms(2000)]
        );
        assert_eq!(policy.next_delay(), ms(2000));
    }

    #[test]
    fn test_reset_after_success() {
        let mut policy = ReconnectPolicy::new(ms(100), ms(2000));
        policy.next_delay();
        policy.next_delay();
        assert_eq!(policy.attempt(), 2);

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.next_delay(), ms(100));
    }

    #[test]
    fn test_non_decreasing_and_no_overflow() {
        let policy = ReconnectPolicy::new(ms(1000), ms(5000));

        let mut previous = Duration::ZERO;
        for attempt in [0, 1, 2, 3, 31, 32, 64, u32::MAX] {
            let delay = policy.delay(attempt);
            assert!(delay >= previous);
            assert!(delay <= ms(5000));
            previous = delay;
        }
    }

    #[test]
    fn test_inverted_bounds() {
        let policy = ReconnectPolicy::new(ms(3000), ms(1000));

        assert_eq!(policy.max_delay(), ms(3000));
        assert_eq!(policy.delay(0), ms(3000));
        assert_eq!(policy.delay(5), ms(3000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut policy = ReconnectPolicy::new(ms(100), ms(2000)).with_jitter(true);

        for _ in 0..50 {
            let delay = policy.next_delay();
            assert!(delay >= ms(100) && delay <= ms(2000), "{delay:?}");
        }
    }

    #[test]
    fn test_zero_min_delay_still_backs_off() {
        let mut policy = ReconnectPolicy::new(Duration::ZERO, ms(8));

        assert_eq!(policy.min_delay(), MIN_RECONNECT_DELAY);
        let delays: Vec<_> = (0..5).map(|_| policy.next_delay()).collect();
        assert_eq!(delays, vec![ms(1), ms(2), ms(4), ms(8), ms(8)]);

        let flat = ReconnectPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(flat.delay(0), MIN_RECONNECT_DELAY);
        assert_eq!(flat.max_delay(), MIN_RECONNECT_DELAY);
    }
}
