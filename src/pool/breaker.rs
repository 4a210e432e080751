//! Consecutive-failure circuit breaker.
//!
//! The streak counts failed jobs since the last successful one. Reaching
//! the threshold is the run's only automatic signal that credentials have
//! expired or upstream is blocking, and it aborts the run.

use tracing::error;

/// Tracks the failure streak of one run. Not persisted.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    streak: u32,
    /// Streak at the moment the breaker tripped
    tripped_at: Option<u32>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            streak: 0,
            tripped_at: None,
        }
    }

    /// Record a job result.
    ///
    /// Returns `true` only on the call that trips the breaker, so callers
    /// that share it behind a lock make the abort decision exactly once.
    pub fn on_result(&mut self, success: bool) -> bool {
        if success {
            self.streak = 0;
            return false;
        }

        self.streak += 1;
        if self.tripped_at.is_none() && self.streak >= self.threshold {
            self.tripped_at = Some(self.streak);
            error!(
                streak = self.streak,
                threshold = self.threshold,
                "Too many consecutive failures, aborting (likely bad cookies)"
            );
            return true;
        }
        false
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped_at.is_some()
    }

    /// Failure streak that tripped the breaker, kept even if a later
    /// success resets the live streak.
    pub fn tripped_at(&self) -> Option<u32> {
        self.tripped_at
    }

    /// Current failure streak.
    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
