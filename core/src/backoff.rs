//! Exponential reconnect backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Reconnect backoff state.
///
/// The delay for attempt `n` is `min(max, initial · multiplier^n)` scaled by
/// a random factor in `1 ± jitter`. The attempt counter advances on each
/// scheduled reconnect and resets only on a successful authentication.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempt: 0,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            attempt: 0,
            initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// The base delay for a given attempt, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(63) as i32);
        let secs = self.initial.as_secs_f64() * exp;
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }

    /// The delay for the next reconnect attempt. Advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }

    /// Reset after a successful authentication.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Advance the counter by extra steps without scheduling a delay.
    ///
    /// Used when the relay answers `AGENT_EXISTS`: backing off harder
    /// protects the incumbent agent.
    pub fn penalize(&mut self, steps: u32) {
        self.attempt = self.attempt.saturating_add(steps);
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delays_double_then_cap() {
        let b = Backoff::default();
        assert_eq!(b.base_delay(0), Duration::from_secs(1));
        assert_eq!(b.base_delay(1), Duration::from_secs(2));
        assert_eq!(b.base_delay(4), Duration::from_secs(16));
        assert_eq!(b.base_delay(5), Duration::from_secs(30));
        assert_eq!(b.base_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn next_delay_stays_within_jitter_band() {
        let mut b = Backoff::default();
        // attempt 0 -> base 1s, jitter ±10%
        let d = b.next_delay();
        assert!(d >= Duration::from_millis(900), "too short: {d:?}");
        assert!(d <= Duration::from_millis(1100), "too long: {d:?}");
        assert_eq!(b.attempt(), 1);
    }

    #[test]
    fn delay_never_exceeds_cap_plus_jitter() {
        let mut b = Backoff::default();
        b.penalize(40);
        let d = b.next_delay();
        assert!(d <= Duration::from_secs(33), "beyond cap+jitter: {d:?}");
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut b = Backoff::default();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.base_delay(b.attempt()), Duration::from_secs(1));
    }

    #[test]
    fn penalize_advances_five_steps() {
        let mut b = Backoff::default();
        b.next_delay(); // attempt -> 1
        b.penalize(5);
        assert_eq!(b.attempt(), 6);
        // Next base delay reflects the penalized attempt (capped at 30s).
        assert_eq!(b.base_delay(b.attempt()), Duration::from_secs(30));
    }

    #[test]
    fn attempt_counter_saturates() {
        let mut b = Backoff::default();
        b.penalize(u32::MAX);
        b.penalize(5);
        assert_eq!(b.attempt(), u32::MAX);
    }
}
