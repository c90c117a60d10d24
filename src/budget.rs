//! Timeout budget shared by every nested operation of one tool call
//!
//! A budget is created once per incoming call from the configured total
//! timeout and handed down, read-only, to each step the call performs.
//! Every step derives its command timeout from what is left, so the
//! allowance shrinks as earlier steps consume time and no single step can
//! silently use up the caller's whole deadline.
//!
//! The budget itself never fails. Callers check [`TimeoutBudget::is_exceeded`]
//! or hand [`TimeoutBudget::signal`] to work that stops when it fires.

use crate::cancel::CancelSignal;
use std::num::NonZeroU64;
use std::time::Duration;
use tokio::time::Instant;

/// Shrinking time allowance bound to one incoming call
#[derive(Debug, Clone)]
pub struct TimeoutBudget {
    total_secs: NonZeroU64,
    started: Instant,
    signal: CancelSignal,
}

impl TimeoutBudget {
    /// Start a budget of `total_secs`, measured from now
    ///
    /// The budget's signal fires on its own once the total elapses.
    pub fn new(total_secs: NonZeroU64) -> Self {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(total_secs.get());
        Self {
            total_secs,
            started,
            signal: CancelSignal::with_deadline(deadline),
        }
    }

    /// Configured total in seconds
    pub fn total_secs(&self) -> u64 {
        self.total_secs.get()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `total - elapsed` in seconds; zero or negative once exceeded
    pub fn remaining_secs(&self) -> f64 {
        self.total_secs.get() as f64 - self.elapsed().as_secs_f64()
    }

    pub fn is_exceeded(&self) -> bool {
        self.remaining_secs() <= 0.0
    }

    /// Command timeout for the next step: `max(1, min(default, ceil(remaining)))`
    ///
    /// Never returns zero, since most drivers read a zero command timeout
    /// as "wait forever".
    pub fn effective_command_timeout(&self, default_secs: u64) -> u64 {
        let remaining = self.remaining_secs().ceil() as i64;
        let default = i64::try_from(default_secs).unwrap_or(i64::MAX);
        remaining.min(default).max(1) as u64
    }

    /// [`effective_command_timeout`](Self::effective_command_timeout) as a `Duration`
    pub fn effective_command_duration(&self, default: Duration) -> Duration {
        Duration::from_secs(self.effective_command_timeout(default.as_secs()))
    }

    /// Signal that fires when the total elapses
    pub fn signal(&self) -> CancelSignal {
        self.signal.clone()
    }

    /// Error text reported to the caller once the budget is exhausted
    pub fn exceeded_message(&self) -> String {
        format!(
            "Total tool call timeout of {}s exceeded (elapsed: {:.1}s)",
            self.total_secs.get(),
            self.elapsed().as_secs_f64()
        )
    }
}

/// Fold an optional budget into an optional existing cancellation signal
///
/// - no budget: `existing` is returned unchanged
/// - budget, no existing signal: the budget's own signal
/// - both: a new signal that fires when either fires
pub fn combine_cancellation(
    budget: Option<&TimeoutBudget>,
    existing: Option<CancelSignal>,
) -> Option<CancelSignal> {
    match (budget, existing) {
        (None, existing) => existing,
        (Some(budget), None) => Some(budget.signal()),
        (Some(budget), Some(existing)) => Some(CancelSignal::any([existing, budget.signal()])),
    }
}

/// Command timeout for a step with or without a budget
pub fn command_timeout(budget: Option<&TimeoutBudget>, default: Duration) -> Duration {
    match budget {
        Some(budget) => budget.effective_command_duration(default),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(secs: u64) -> TimeoutBudget {
        TimeoutBudget::new(NonZeroU64::new(secs).unwrap_or(NonZeroU64::MIN))
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_wins_over_larger_default() {
        let b = budget(10);
        assert_eq!(b.effective_command_timeout(30), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_shrinks_as_time_passes() {
        let b = budget(10);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let effective = b.effective_command_timeout(30);
        assert!((7..=9).contains(&effective), "got {}", effective);
    }

    #[tokio::test(start_paused = true)]
    async fn test_smaller_default_wins() {
        let b = budget(10);
        assert_eq!(b.effective_command_timeout(5), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_floor_of_one_second_once_exceeded() {
        let b = budget(1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(b.is_exceeded());
        assert!(b.remaining_secs() < 0.0);
        assert_eq!(b.effective_command_timeout(30), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_fires_when_total_elapses() {
        let b = budget(3);
        let signal = b.signal();
        assert!(!signal.is_cancelled());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(signal.is_cancelled());
        assert!(b.is_exceeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exceeded_message_reports_total_and_elapsed() {
        let b = budget(2);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let msg = b.exceeded_message();
        assert!(msg.contains("2s"), "{}", msg);
        assert!(msg.contains("2.5s"), "{}", msg);
    }

    #[tokio::test]
    async fn test_combine_without_budget_returns_existing() {
        assert!(combine_cancellation(None, None).is_none());

        let existing = CancelSignal::new();
        let combined = combine_cancellation(None, Some(existing.clone()));
        assert!(combined.is_some());
        if let Some(combined) = combined {
            existing.cancel();
            assert!(combined.is_cancelled());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_combine_with_budget_only_uses_budget_signal() {
        let b = budget(1);
        let combined = combine_cancellation(Some(&b), None);
        assert!(combined.is_some());
        if let Some(combined) = combined {
            assert!(!combined.is_cancelled());
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(combined.is_cancelled());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_combine_both_is_logical_or() {
        let b = budget(60);
        let existing = CancelSignal::new();
        let combined = combine_cancellation(Some(&b), Some(existing.clone()));
        assert!(combined.is_some());
        if let Some(combined) = combined {
            assert!(!combined.is_cancelled());
            existing.cancel();
            assert!(combined.is_cancelled());
            assert!(!b.signal().is_cancelled());
        }
    }

    #[test]
    fn test_command_timeout_without_budget_is_default() {
        assert_eq!(
            command_timeout(None, Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }
}
