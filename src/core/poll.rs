//! Bounded exponential backoff for executor polling.

use std::time::{Duration, Instant};

use crate::config::PollConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn from_config(config: &PollConfig) -> Self {
        Self {
            initial_interval: Duration::from_secs(config.initial_interval_secs),
            max_interval: Duration::from_secs(config.max_interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_interval, self.max_interval)
    }

    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.timeout)
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}

/// Doubling delay, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Sleep for `delay`, never past the deadline.
    pub fn sleep(&self, delay: Duration) {
        let delay = delay.min(self.remaining());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn initial_above_max_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_secs(90), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn settings_follow_config_defaults() {
        let settings = PollSettings::default();
        assert_eq!(settings.initial_interval, Duration::from_secs(5));
        assert_eq!(settings.max_interval, Duration::from_secs(60));
        assert_eq!(settings.timeout, Duration::from_secs(30 * 60));
    }

    #[test]
    fn deadline_expires_and_bounds_sleep() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let started = Instant::now();
        deadline.sleep(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(deadline.expired());
    }
}
