//! Join retry policy

/// Capped exponential backoff
///
/// The delay after the n-th consecutive failure is
/// `initial * factor^(n-1)`, never more than `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Backoff {
    initial_ms: u32,
    max_ms: u32,
    factor: u32,
    failures: u32,
}

impl Backoff {
    /// Create a backoff policy
    pub const fn new(initial_ms: u32, max_ms: u32, factor: u32) -> Self {
        Self {
            initial_ms,
            max_ms,
            factor,
            failures: 0,
        }
    }

    /// Resume from a failure count kept across a restart
    pub const fn with_failures(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    /// Consecutive failures recorded so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Forget past failures
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Delay to wait before the next attempt, 0 without failures
    pub fn next_delay_ms(&self) -> u32 {
        if self.failures == 0 {
            return 0;
        }

        let mut delay = self.initial_ms.min(self.max_ms);
        if self.factor <= 1 {
            return delay;
        }
        for _ in 1..self.failures {
            delay = delay.saturating_mul(self.factor);
            if delay >= self.max_ms {
                return self.max_ms;
            }
        }
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        // 5 s, doubling, capped at 10 min
        Self::new(5_000, 600_000, 2)
    }
}
