//! Bounded fixed-delay retry budget shared by the restart and reconnect policies.

use std::time::Duration;

use backoff::backoff::{Backoff, Constant};

/// Outcome of recording one failure against a [`RetryBudget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`; `attempt` is the 1-based retry number.
    RetryAfter { attempt: u32, delay: Duration },
    /// More than `max_retries` consecutive failures; give up.
    Exhausted { failures: u32 },
}

/// Consecutive-failure counter with a fixed delay between attempts.
#[derive(Debug)]
pub struct RetryBudget {
    max_retries: u32,
    count: u32,
    delay: Duration,
    backoff: Constant,
}

impl RetryBudget {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            count: 0,
            delay,
            backoff: Constant::new(delay),
        }
    }

    /// Count one more consecutive failure.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.count = self.count.saturating_add(1);

        if self.count > self.max_retries {
            return RetryDecision::Exhausted {
                failures: self.count,
            };
        }

        RetryDecision::RetryAfter {
            attempt: self.count,
            delay: self.backoff.next_backoff().unwrap_or(self.delay),
        }
    }

    /// Forget all failures (the worker came back).
    pub fn reset(&mut self) {
        self.count = 0;
        self.backoff.reset();
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_exhausted(&self) -> bool {
        self.count > self.max_retries
    }
}
