//! Retry budgets for remote calls.
//!
//! Every policy is exponential: attempt `n` waits `base_delay * 2^n`. Budgets
//! never persist across invocations.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    /// Object reads that may race the writer's own PUT.
    #[must_use]
    pub const fn object_read() -> Self {
        Self::new(5, Duration::from_millis(300))
    }

    /// Reverse-geocode lookups.
    #[must_use]
    pub const fn geocode() -> Self {
        Self::new(3, Duration::from_millis(500))
    }

    /// Conditional-write conflicts on the merge transaction.
    #[must_use]
    pub const fn merge_conflict() -> Self {
        Self::new(5, Duration::from_millis(100))
    }

    /// Delay before the attempt following `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.saturating_pow(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(300));
        assert_eq!(policy.delay(0), Duration::from_millis(300));
        assert_eq!(policy.delay(1), Duration::from_millis(600));
        assert_eq!(policy.delay(2), Duration::from_millis(1200));
    }
}
