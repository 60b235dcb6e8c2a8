//! Retry bookkeeping and the consecutive-failure circuit breaker.
//!
//! Retry logic is stateless: attempt counting lives in the executor, the
//! functions here just answer "retry again?" and "wait how long?". The
//! circuit breaker carries the one piece of state that must outlive a single
//! node execution, the consecutive-failure count inside a loop.

use std::time::Duration;

use pagewright_types::workflow::RetryPolicy;

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Stateless retry decisions. `attempt` is 1-based: the first execution is
/// attempt 1, so with `max_attempts = 3` attempts 1 and 2 may retry and
/// attempt 3 may not.
pub struct RetryHandler;

impl RetryHandler {
    pub fn should_retry(policy: &RetryPolicy, attempt: u32) -> bool {
        attempt < policy.max_attempts
    }

    /// Delay to sleep before the given 1-based attempt. Attempt 1 runs
    /// immediately; later attempts read the backoff schedule, clamped to its
    /// last entry when attempts outnumber entries.
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        Duration::from_millis(policy.backoff_before(attempt))
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Counts consecutive failures; opens once the threshold is reached.
///
/// One breaker instance lives for the duration of a loop, so failures in
/// successive iterations accumulate; any success resets the count.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive_failures: 0,
        }
    }

    /// Record a failed execution. Returns `true` when this failure opened
    /// the breaker.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.is_open()
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn is_open(&self) -> bool {
        self.threshold > 0 && self.consecutive_failures >= self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
