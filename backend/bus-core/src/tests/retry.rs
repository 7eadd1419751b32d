use crate::retry::{RetryBudget, RetryDecision};

use std::time::Duration;

/// **VALUE**: Verifies that exactly `max_retries` retries are granted before exhaustion.
///
/// **WHY THIS MATTERS**: The restart policy promises `max_retries + 1` crashes before
/// giving up, no more and no fewer.
///
/// **BUG THIS CATCHES**: Would catch an off-by-one between `>` and `>=`.
#[test]
fn given_max_three_when_four_failures_recorded_then_fourth_exhausts() {
    // GIVEN: A budget of 3 with a fixed delay
    let delay = Duration::from_millis(250);
    let mut budget = RetryBudget::new(3, delay);

    // WHEN: Recording failures
    let decisions: Vec<RetryDecision> = (0..4).map(|_| budget.record_failure()).collect();

    // THEN: Three fixed-delay retries then exhaustion
    assert_eq!(
        decisions,
        vec![
            RetryDecision::RetryAfter { attempt: 1, delay },
            RetryDecision::RetryAfter { attempt: 2, delay },
            RetryDecision::RetryAfter { attempt: 3, delay },
            RetryDecision::Exhausted { failures: 4 },
        ]
    );
    assert!(budget.is_exhausted());
}

/// **VALUE**: Verifies that reset restores the full budget.
///
/// **WHY THIS MATTERS**: A worker that reconnects must get a fresh set of retries.
///
/// **BUG THIS CATCHES**: Would catch reset leaving the counter untouched.
#[test]
fn given_failures_when_reset_then_count_zero_and_retries_available() {
    // GIVEN: Two recorded failures
    let mut budget = RetryBudget::new(2, Duration::from_millis(10));
    budget.record_failure();
    budget.record_failure();
    assert_eq!(budget.count(), 2);

    // WHEN: Resetting
    budget.reset();

    // THEN: Counting starts over
    assert_eq!(budget.count(), 0);
    assert!(matches!(
        budget.record_failure(),
        RetryDecision::RetryAfter { attempt: 1, .. }
    ));
}

/// **VALUE**: Verifies that a zero budget exhausts on the first failure.
///
/// **WHY THIS MATTERS**: `max_retries = 0` means "never restart".
///
/// **BUG THIS CATCHES**: Would catch a free first retry.
#[test]
fn given_zero_budget_when_failure_recorded_then_exhausted() {
    let mut budget = RetryBudget::new(0, Duration::from_millis(10));
    assert_eq!(
        budget.record_failure(),
        RetryDecision::Exhausted { failures: 1 }
    );
}
