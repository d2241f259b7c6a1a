//! Failure-accounting strategies that drive the breaker's state machine.

use std::time::{Duration, Instant};

use crate::factory::BreakerKind;
use crate::state::{State, StateMachine};
use crate::window::OutcomeWindow;

/// What a policy gets to see on each call besides its own counters.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    /// Name of the breaker, for log lines.
    pub name: &'a str,
    /// Current time according to the breaker's clock.
    pub now: Instant,
}

/// A strategy that decides when to block, trip and recover.
///
/// Every method runs inside the breaker's critical section, with exclusive
/// access to both the policy counters and the [`StateMachine`]. State changes
/// must go through [`StateMachine::change_state`].
pub trait BreakerPolicy: Send + 'static {
    /// Which strategy this is.
    fn kind(&self) -> BreakerKind;

    /// Decides whether a call may proceed. May move OPEN to HALF_OPEN.
    fn allow_request(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) -> bool;

    /// Accounts for a call that returned normally.
    fn record_success(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>);

    /// Accounts for a call that returned an error.
    fn record_failure(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>);

    /// Copies out the current counters.
    fn snapshot(&mut self, now: Instant) -> PolicySnapshot;
}

impl BreakerPolicy for Box<dyn BreakerPolicy> {
    fn kind(&self) -> BreakerKind {
        (**self).kind()
    }

    fn allow_request(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) -> bool {
        (**self).allow_request(machine, ctx)
    }

    fn record_success(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) {
        (**self).record_success(machine, ctx)
    }

    fn record_failure(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) {
        (**self).record_failure(machine, ctx)
    }

    fn snapshot(&mut self, now: Instant) -> PolicySnapshot {
        (**self).snapshot(now)
    }
}

/// Point-in-time view of a policy's counters.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicySnapshot {
    /// Counters of a [`CountPolicy`].
    Count {
        /// Consecutive failures seen while closed.
        failure_count: u32,
        /// When the breaker last opened.
        last_failure_time: Option<Instant>,
    },
    /// Counters of a [`TimeWindowPolicy`], after eviction.
    TimeWindow {
        /// Outcomes inside the window.
        total: usize,
        /// Failed outcomes inside the window.
        failed: usize,
        /// Failure ratio as used for tripping.
        failure_rate: f64,
        /// When the breaker last opened.
        last_open_time: Option<Instant>,
    },
}

impl PolicySnapshot {
    /// Consecutive failures, for count-based snapshots.
    pub fn failure_count(&self) -> Option<u32> {
        match self {
            PolicySnapshot::Count { failure_count, .. } => Some(*failure_count),
            PolicySnapshot::TimeWindow { .. } => None,
        }
    }

    /// Failure ratio over the window, for time-window snapshots.
    pub fn failure_rate(&self) -> Option<f64> {
        match self {
            PolicySnapshot::TimeWindow { failure_rate, .. } => Some(*failure_rate),
            PolicySnapshot::Count { .. } => None,
        }
    }

    /// When the breaker last opened, whatever the strategy.
    pub fn last_opened(&self) -> Option<Instant> {
        match self {
            PolicySnapshot::Count {
                last_failure_time, ..
            } => *last_failure_time,
            PolicySnapshot::TimeWindow { last_open_time, .. } => *last_open_time,
        }
    }
}

/// Whole seconds elapsed since `since`, the resolution timeouts are compared at.
fn whole_secs_since(since: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(since).as_secs()
}

/// Trips after a run of consecutive failures.
#[derive(Debug, Clone)]
pub struct CountPolicy {
    failure_threshold: u32,
    reset_timeout: Duration,
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

impl CountPolicy {
    /// Creates a new count-based policy.
    ///
    /// The breaker probes again once more than `reset_timeout` whole seconds
    /// have passed since it opened.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            failure_count: 0,
            last_failure_time: None,
        }
    }

    /// Consecutive failures counted so far.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    fn open(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) {
        tracing::warn!(breaker = %ctx.name, from = %machine.current(), "circuit breaker opening after failure");
        machine.change_state(State::Open);
        self.last_failure_time = Some(ctx.now);
    }

    fn close(&mut self, machine: &mut StateMachine) {
        machine.change_state(State::Closed);
        self.failure_count = 0;
        self.last_failure_time = None;
    }
}

impl BreakerPolicy for CountPolicy {
    fn kind(&self) -> BreakerKind {
        BreakerKind::CountBased
    }

    fn allow_request(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) -> bool {
        match machine.current() {
            State::Closed | State::HalfOpen => true,
            State::Open => match self.last_failure_time {
                Some(opened)
                    if whole_secs_since(opened, ctx.now) > self.reset_timeout.as_secs() =>
                {
                    tracing::info!(breaker = %ctx.name, "reset timeout reached, moving to HALF_OPEN");
                    machine.change_state(State::HalfOpen);
                    self.failure_count = 0;
                    true
                }
                // A missing timestamp keeps the circuit blocked.
                _ => false,
            },
        }
    }

    fn record_success(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) {
        match machine.current() {
            State::Closed => self.failure_count = 0,
            State::HalfOpen => self.close(machine),
            State::Open => {
                tracing::debug!(breaker = %ctx.name, "success ignored while OPEN");
            }
        }
    }

    fn record_failure(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) {
        match machine.current() {
            State::Closed => {
                self.failure_count = self.failure_count.saturating_add(1);
                if self.failure_count >= self.failure_threshold {
                    tracing::warn!(
                        breaker = %ctx.name,
                        threshold = self.failure_threshold,
                        "failure threshold breached"
                    );
                    self.open(machine, ctx);
                }
            }
            State::HalfOpen => self.open(machine, ctx),
            State::Open => {
                tracing::debug!(breaker = %ctx.name, "failure ignored while OPEN");
            }
        }
    }

    fn snapshot(&mut self, _now: Instant) -> PolicySnapshot {
        PolicySnapshot::Count {
            failure_count: self.failure_count,
            last_failure_time: self.last_failure_time,
        }
    }
}

/// Trips when the failure ratio inside a sliding time window gets too high.
#[derive(Debug, Clone)]
pub struct TimeWindowPolicy {
    failure_threshold: f64,
    reset_timeout: Duration,
    window: OutcomeWindow,
    last_open_time: Option<Instant>,
}

impl TimeWindowPolicy {
    /// Creates a new time-window policy.
    ///
    /// `failure_threshold` is a ratio in `[0, 1]`.
    pub fn new(failure_threshold: f64, failure_window: Duration, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            window: OutcomeWindow::new(failure_window),
            last_open_time: None,
        }
    }

    /// Current failure ratio, after dropping stale outcomes.
    pub fn failure_rate(&mut self, now: Instant) -> f64 {
        self.window.failure_rate(now)
    }

    fn should_trip(&mut self, now: Instant) -> bool {
        let rate = self.window.failure_rate(now);
        // Fewer than two outcomes never trip, even with a zero threshold.
        self.window.len() > 1 && rate >= self.failure_threshold
    }

    fn open(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) {
        tracing::warn!(breaker = %ctx.name, from = %machine.current(), "circuit breaker opening after failure");
        machine.change_state(State::Open);
        self.window.clear();
        self.last_open_time = Some(ctx.now);
    }
}

impl BreakerPolicy for TimeWindowPolicy {
    fn kind(&self) -> BreakerKind {
        BreakerKind::TimeWindow
    }

    fn allow_request(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) -> bool {
        self.window.evict(ctx.now);

        match machine.current() {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let expired = self.last_open_time.map_or(true, |opened| {
                    whole_secs_since(opened, ctx.now) > self.reset_timeout.as_secs()
                });

                if expired {
                    tracing::info!(breaker = %ctx.name, "reset timeout reached, moving to HALF_OPEN");
                    machine.change_state(State::HalfOpen);
                }
                expired
            }
        }
    }

    fn record_success(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) {
        self.window.record(ctx.now, true);

        if machine.current() == State::HalfOpen {
            tracing::info!(breaker = %ctx.name, "probe succeeded, moving to CLOSED");
            machine.change_state(State::Closed);
            self.window.clear();
            self.last_open_time = None;
        }
    }

    fn record_failure(&mut self, machine: &mut StateMachine, ctx: PolicyContext<'_>) {
        self.window.record(ctx.now, false);

        match machine.current() {
            State::Closed => {
                if self.should_trip(ctx.now) {
                    tracing::warn!(
                        breaker = %ctx.name,
                        threshold = self.failure_threshold,
                        "failure rate threshold breached"
                    );
                    self.open(machine, ctx);
                }
            }
            State::HalfOpen => self.open(machine, ctx),
            State::Open => {
                tracing::debug!(breaker = %ctx.name, "failure ignored while OPEN");
            }
        }
    }

    fn snapshot(&mut self, now: Instant) -> PolicySnapshot {
        let failure_rate = self.window.failure_rate(now);
        PolicySnapshot::TimeWindow {
            total: self.window.len(),
            failed: self.window.failures(),
            failure_rate,
            last_open_time: self.last_open_time,
        }
    }
}
