//! Retry and wall-clock budget helpers for deterministic orchestration.

use std::time::{Duration, Instant};

use thiserror::Error;

/// Remaining generate-execute cycles for a run.
///
/// Decremented exactly once per execution pass and never below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    initial: u32,
    remaining: u32,
}

impl RetryBudget {
    pub fn new(initial: u32) -> Self {
        Self {
            initial,
            remaining: initial,
        }
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn spent(&self) -> u32 {
        self.initial - self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Consume one cycle and return what is left.
    pub fn consume(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }
}

/// The run's wall-clock budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run timed out")]
pub struct DeadlineExceeded;

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration, DeadlineExceeded> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(DeadlineExceeded);
    }
    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_decrements_until_zero() {
        let mut budget = RetryBudget::new(2);
        assert_eq!(budget.consume(), 1);
        assert_eq!(budget.consume(), 0);
        assert!(budget.is_exhausted());
        assert_eq!(budget.consume(), 0);
        assert_eq!(budget.spent(), 2);
        assert_eq!(budget.initial(), 2);
    }

    #[test]
    fn remaining_budget_errors_after_deadline() {
        let now = Instant::now();
        assert_eq!(remaining_budget(now), Err(DeadlineExceeded));
        let future = Instant::now() + Duration::from_secs(60);
        assert!(remaining_budget(future).expect("remaining") > Duration::from_secs(1));
    }
}
