//! Time-ordered outcome log for the time-window strategy.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A recorded call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// When the outcome was recorded.
    pub at: Instant,
    /// Whether the call succeeded.
    pub success: bool,
}

/// A sliding window of call outcomes.
///
/// Appends go to the tail and eviction pops from the head, so insertion order
/// is chronological order. Not synchronised on its own; the owning breaker
/// guards it with the same lock as its state.
#[derive(Debug, Clone)]
pub struct OutcomeWindow {
    outcomes: VecDeque<Outcome>,
    window_size: Duration,
}

impl OutcomeWindow {
    /// Creates an empty window covering `window_size`.
    pub fn new(window_size: Duration) -> Self {
        Self {
            outcomes: VecDeque::new(),
            window_size,
        }
    }

    /// Length of the window.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Appends an outcome at `now`.
    pub fn record(&mut self, now: Instant, success: bool) {
        self.outcomes.push_back(Outcome { at: now, success });
    }

    /// Drops every outcome older than `now - window_size`.
    pub fn evict(&mut self, now: Instant) {
        // Before the window has been open for `window_size` nothing can be stale.
        let Some(cutoff) = now.checked_sub(self.window_size) else {
            return;
        };

        while let Some(outcome) = self.outcomes.front() {
            if outcome.at < cutoff {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of outcomes currently held.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the window holds no outcomes.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of failed outcomes currently held.
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    /// Failure ratio after eviction.
    ///
    /// Zero when the window is empty or holds a single outcome, so one failed
    /// call at the start of a window never trips the breaker by itself.
    pub fn failure_rate(&mut self, now: Instant) -> f64 {
        self.evict(now);

        let total = self.outcomes.len();
        if total <= 1 {
            return 0.0;
        }

        self.failures() as f64 / total as f64
    }

    /// Forgets every outcome.
    pub fn clear(&mut self) {
        self.outcomes.clear();
    }
}
