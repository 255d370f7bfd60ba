//! Spin-then-park waiting policy shared by readers, the writer and
//! write-intent contenders.
//!
//! Below the spin threshold a waiter yields the processor; above it the
//! waiter parks for a bounded interval. Wakeups may be lost or spurious, so
//! callers always re-check their condition after every step.

use crate::config::LockConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Yield the processor and retry.
    Spin,
    /// Park for at most the given duration and retry.
    Park(Duration),
}

#[derive(Debug)]
pub struct Backoff {
    iteration: u32,
    spin_threshold: u32,
    park_interval: Duration,
}

impl Backoff {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            iteration: 0,
            spin_threshold: config.spin_threshold,
            park_interval: config.park_interval,
        }
    }

    #[inline]
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    #[inline]
    pub fn is_spinning(&self) -> bool {
        self.iteration < self.spin_threshold
    }

    /// Decide the next step and count the failed attempt.
    pub fn next_step(&mut self) -> Step {
        let step = if self.is_spinning() {
            Step::Spin
        } else {
            Step::Park(self.park_interval)
        };
        self.iteration = self.iteration.saturating_add(1);
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spins_then_parks() {
        let cfg = LockConfig::default()
            .with_spin_threshold(3)
            .with_park_interval(Duration::from_micros(50));
        let mut b = Backoff::new(&cfg);
        assert_eq!(b.next_step(), Step::Spin);
        assert_eq!(b.next_step(), Step::Spin);
        assert_eq!(b.next_step(), Step::Spin);
        assert_eq!(b.next_step(), Step::Park(Duration::from_micros(50)));
        assert_eq!(b.next_step(), Step::Park(Duration::from_micros(50)));
        assert_eq!(b.iteration(), 5);
    }

    #[test]
    fn zero_threshold_parks_immediately() {
        let cfg = LockConfig::default().with_spin_threshold(0);
        let mut b = Backoff::new(&cfg);
        assert!(!b.is_spinning());
        assert!(matches!(b.next_step(), Step::Park(_)));
    }
}
