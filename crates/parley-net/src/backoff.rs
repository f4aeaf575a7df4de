//! Retry timing for the hub connection.
//!
//! Two policies are in play:
//! - [`ConnectBackoff`] for attempts started by `connect` (exponential,
//!   capped, with a failure budget that ends in a terminal error state);
//! - [`ReconnectSchedule`] for recovering a link that dropped after being
//!   established (a short fixed list of delays, then give up).

use std::time::Duration;

use parley_shared::constants::{
    CONNECT_RETRY_BASE, CONNECT_RETRY_MAX, DEFAULT_MAX_CONNECT_ATTEMPTS, RECONNECT_DELAYS,
};

/// Exponential backoff for failed connect attempts.
#[derive(Debug, Clone)]
pub struct ConnectBackoff {
    /// Consecutive failures so far.
    pub failures: u32,
    /// Failures tolerated before giving up.
    pub max_attempts: u32,
    base: Duration,
    max_delay: Duration,
}

impl Default for ConnectBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECT_ATTEMPTS)
    }
}

impl ConnectBackoff {
    pub fn new(max_attempts: u32) -> Self {
        Self::with_delays(max_attempts, CONNECT_RETRY_BASE, CONNECT_RETRY_MAX)
    }

    pub fn with_delays(max_attempts: u32, base: Duration, max_delay: Duration) -> Self {
        Self {
            failures: 0,
            max_attempts: max_attempts.max(1),
            base,
            max_delay,
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` once the budget is spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }
        let exp = self.failures.saturating_sub(1).min(16);
        Some(std::cmp::min(self.base * 2u32.pow(exp), self.max_delay))
    }

    pub fn exhausted(&self) -> bool {
        self.failures >= self.max_attempts
    }
}

/// Fixed delays for re-establishing a dropped link.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    delays: Vec<Duration>,
    next: usize,
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self::new(RECONNECT_DELAYS.to_vec())
    }
}

impl ReconnectSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays, next: 0 }
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Delay before the next reconnect attempt, `None` when exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.delays.get(self.next).copied()?;
        self.next += 1;
        Some(delay)
    }

    /// Reconnect attempts made since the last reset.
    pub fn attempts(&self) -> usize {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_backoff_doubles_and_caps() {
        let mut b = ConnectBackoff::with_delays(10, Duration::from_secs(5), Duration::from_secs(30));
        assert_eq!(b.on_failure(), Some(Duration::from_secs(5)));
        assert_eq!(b.on_failure(), Some(Duration::from_secs(10)));
        assert_eq!(b.on_failure(), Some(Duration::from_secs(20)));
        assert_eq!(b.on_failure(), Some(Duration::from_secs(30)));
        assert_eq!(b.on_failure(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_connect_backoff_exhausts() {
        let mut b = ConnectBackoff::new(3);
        assert!(b.on_failure().is_some());
        assert!(b.on_failure().is_some());
        assert_eq!(b.on_failure(), None);
        assert!(b.exhausted());

        b.reset();
        assert!(!b.exhausted());
        assert!(b.on_failure().is_some());
    }

    #[test]
    fn test_reconnect_schedule() {
        let mut s = ReconnectSchedule::default();
        assert_eq!(s.next_delay(), Some(Duration::from_secs(0)));
        assert_eq!(s.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(s.next_delay(), Some(Duration::from_secs(10)));
        assert_eq!(s.next_delay(), Some(Duration::from_secs(30)));
        assert_eq!(s.next_delay(), None);
        assert_eq!(s.attempts(), 4);

        s.reset();
        assert_eq!(s.next_delay(), Some(Duration::ZERO));
    }
}
