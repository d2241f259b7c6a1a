//! Core circuit breaker implementation.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Instant;

use crate::clock::Clock;
use crate::config::BreakerBuilder;
use crate::error::{BreakerError, BreakerResult, CircuitOpenError};
use crate::event::{BreakerEvent, EventBus, EventDetail, BLOCKED_REASON};
use crate::factory::BreakerKind;
use crate::policy::{BreakerPolicy, CountPolicy, PolicyContext, PolicySnapshot, TimeWindowPolicy};
use crate::state::{State, StateMachine, Transition};

/// State and counters, always locked together.
struct Guarded<P> {
    machine: StateMachine,
    policy: P,
    /// Set while this breaker's transitions are being delivered.
    dispatching: bool,
}

/// Clears `dispatching` even when a listener panics.
struct DispatchScope<'a, P>(&'a RefCell<Guarded<P>>);

impl<P> Drop for DispatchScope<'_, P> {
    fn drop(&mut self) {
        self.0.borrow_mut().dispatching = false;
    }
}

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner<P>
where
    P: BreakerPolicy,
{
    name: Arc<str>,
    /// Reentrant so listeners running under it can call back into the breaker.
    guarded: ReentrantMutex<RefCell<Guarded<P>>>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

/// A circuit breaker that can wrap function calls to prevent cascading failures.
///
/// The accounting strategy is the type parameter. Breakers built by the
/// [`BreakerFactory`](crate::BreakerFactory) erase it behind
/// `Box<dyn BreakerPolicy>`, which is the default.
pub struct CircuitBreaker<P = Box<dyn BreakerPolicy>>
where
    P: BreakerPolicy,
{
    inner: Arc<BreakerInner<P>>,
}

impl<P> CircuitBreaker<P>
where
    P: BreakerPolicy,
{
    /// Creates a new circuit breaker in the closed state.
    pub fn new(
        name: impl Into<String>,
        policy: P,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
    ) -> Self {
        let name: String = name.into();
        let inner = BreakerInner {
            name: Arc::from(name),
            guarded: ReentrantMutex::new(RefCell::new(Guarded {
                machine: StateMachine::new(),
                policy,
                dispatching: false,
            })),
            events,
            clock,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Name of the protected dependency.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gets the current state of the circuit breaker.
    pub fn state(&self) -> State {
        self.inner.guarded.lock().borrow().machine.current()
    }

    /// Which accounting strategy drives this breaker.
    pub fn kind(&self) -> BreakerKind {
        self.inner.guarded.lock().borrow().policy.kind()
    }

    /// The bus this breaker publishes to.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Copies out the strategy's counters.
    pub fn snapshot(&self) -> PolicySnapshot {
        let guard = self.inner.guarded.lock();
        let now = self.inner.clock.now();
        let snapshot = guard.borrow_mut().policy.snapshot(now);
        snapshot
    }

    /// Asks the strategy whether a call may go through.
    ///
    /// An OPEN breaker whose reset timeout expired moves to HALF_OPEN here.
    pub fn allow_request(&self) -> bool {
        self.with_policy(|policy, machine, ctx| policy.allow_request(machine, ctx))
            .0
    }

    /// Records a successful call without publishing a success event.
    pub fn record_success(&self) {
        self.with_policy(|policy, machine, ctx| policy.record_success(machine, ctx));
    }

    /// Records a failed call without publishing a failure event.
    pub fn record_failure(&self) {
        self.with_policy(|policy, machine, ctx| policy.record_failure(machine, ctx));
    }

    /// Executes a function wrapped by the circuit breaker.
    ///
    /// Blocked calls fail with [`BreakerError::Open`]; operation errors come
    /// back unchanged inside [`BreakerError::Operation`].
    pub fn call<F, T, E>(&self, operation: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        self.execute(operation, None::<fn(BreakerError<E>) -> BreakerResult<T, E>>)
    }

    /// Executes a function, falling back when it is blocked or fails.
    ///
    /// The fallback receives the triggering error. Whatever it returns, value
    /// or error, is what the caller gets.
    pub fn call_with_fallback<F, G, T, E>(&self, operation: F, fallback: G) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        G: FnOnce(BreakerError<E>) -> BreakerResult<T, E>,
        E: Display,
    {
        self.execute(operation, Some(fallback))
    }

    /// The protected-call wrapper behind [`call`](Self::call) and
    /// [`call_with_fallback`](Self::call_with_fallback).
    pub fn execute<F, G, T, E>(&self, operation: F, fallback: Option<G>) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        G: FnOnce(BreakerError<E>) -> BreakerResult<T, E>,
        E: Display,
    {
        if let Err(open) = self.pre_call() {
            return self.blocked(open, fallback);
        }

        let result = operation();
        self.post_call(result, fallback)
    }

    /// Checks with the strategy and publishes a blocked event on refusal.
    fn pre_call(&self) -> Result<(), CircuitOpenError> {
        let ((allowed, state), now) = self.with_policy(|policy, machine, ctx| {
            let allowed = policy.allow_request(machine, ctx);
            (allowed, machine.current())
        });

        if allowed {
            return Ok(());
        }

        self.publish(
            now,
            EventDetail::RequestBlocked {
                state,
                reason: BLOCKED_REASON,
            },
        );

        Err(CircuitOpenError {
            name: self.name().to_string(),
            state,
        })
    }

    fn blocked<G, T, E>(&self, open: CircuitOpenError, fallback: Option<G>) -> BreakerResult<T, E>
    where
        G: FnOnce(BreakerError<E>) -> BreakerResult<T, E>,
        E: Display,
    {
        let Some(fallback) = fallback else {
            return Err(BreakerError::Open(open));
        };

        let state = open.state;
        fallback(BreakerError::Open(open)).map_err(|err| {
            tracing::error!(breaker = %self.name(), %state, error = %err, "fallback failed for blocked request");
            err
        })
    }

    /// Accounts for the outcome, publishes it and applies the fallback.
    fn post_call<G, T, E>(&self, result: Result<T, E>, fallback: Option<G>) -> BreakerResult<T, E>
    where
        G: FnOnce(BreakerError<E>) -> BreakerResult<T, E>,
        E: Display,
    {
        match result {
            Ok(value) => {
                let ((), now) =
                    self.with_policy(|policy, machine, ctx| policy.record_success(machine, ctx));
                tracing::debug!(breaker = %self.name(), "registered success");
                self.publish(now, EventDetail::Success);
                Ok(value)
            }
            Err(err) => {
                let ((), now) =
                    self.with_policy(|policy, machine, ctx| policy.record_failure(machine, ctx));
                let cause = err.to_string();
                tracing::debug!(breaker = %self.name(), %cause, "registered failure");
                self.publish(now, EventDetail::Failure { cause });

                match fallback {
                    Some(fallback) => fallback(BreakerError::Operation(err)),
                    None => Err(BreakerError::Operation(err)),
                }
            }
        }
    }

    /// Runs `f` inside the critical section and delivers the transitions it
    /// caused before the lock is released, so `StateChanged` events reach
    /// listeners in the order the state actually changed.
    fn with_policy<R>(
        &self,
        f: impl FnOnce(&mut P, &mut StateMachine, PolicyContext<'_>) -> R,
    ) -> (R, Instant) {
        let guard = self.inner.guarded.lock();
        let now = self.inner.clock.now();
        let result = {
            let mut guarded = guard.borrow_mut();
            let Guarded { machine, policy, .. } = &mut *guarded;
            let ctx = PolicyContext {
                name: &self.inner.name,
                now,
            };
            f(&mut *policy, &mut *machine, ctx)
        };

        self.dispatch_transitions(&guard, now);
        (result, now)
    }

    /// Publishes pending transitions while the lock is held.
    ///
    /// A listener that changes state again re-enters on the same thread; its
    /// transitions are queued and delivered by the outermost call, after the
    /// current ones.
    fn dispatch_transitions(
        &self,
        guard: &ReentrantMutexGuard<'_, RefCell<Guarded<P>>>,
        now: Instant,
    ) {
        let cell: &RefCell<Guarded<P>> = guard;
        {
            let mut guarded = cell.borrow_mut();
            if guarded.dispatching {
                return;
            }
            guarded.dispatching = true;
        }
        let _scope = DispatchScope(cell);

        let mut stamp = now;
        loop {
            let transitions = cell.borrow_mut().machine.take_transitions();
            if transitions.is_empty() {
                break;
            }
            for Transition { from, to } in transitions {
                self.publish(stamp, EventDetail::StateChanged { from, to });
            }
            stamp = self.inner.clock.now();
        }
    }

    fn publish(&self, now: Instant, detail: EventDetail) {
        let event = BreakerEvent::new(Arc::clone(&self.inner.name), now, detail);
        self.inner.events.publish(&event);
    }
}

impl CircuitBreaker {
    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder(name: impl Into<String>) -> BreakerBuilder {
        BreakerBuilder::new(name)
    }
}

impl CircuitBreaker<CountPolicy> {
    /// Consecutive failures counted while closed.
    pub fn failure_count(&self) -> u32 {
        self.inner.guarded.lock().borrow().policy.failure_count()
    }
}

impl CircuitBreaker<TimeWindowPolicy> {
    /// Failure ratio over the current window.
    pub fn failure_rate(&self) -> f64 {
        let guard = self.inner.guarded.lock();
        let now = self.inner.clock.now();
        let rate = guard.borrow_mut().policy.failure_rate(now);
        rate
    }
}

// Allow cloning of circuit breakers - cheap because inner state is Arc'd
impl<P> Clone for CircuitBreaker<P>
where
    P: BreakerPolicy,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> fmt::Debug for CircuitBreaker<P>
where
    P: BreakerPolicy,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

// Implement Async support when the feature is enabled
#[cfg(feature = "async")]
impl<P> CircuitBreaker<P>
where
    P: BreakerPolicy,
{
    /// Executes an async function wrapped by the circuit breaker.
    pub async fn call_async<F, Fut, T, E>(&self, operation: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Display,
    {
        self.call_async_inner(operation, None::<fn(BreakerError<E>) -> BreakerResult<T, E>>)
            .await
    }

    /// Executes an async function, falling back when it is blocked or fails.
    pub async fn call_async_with_fallback<F, Fut, G, T, E>(
        &self,
        operation: F,
        fallback: G,
    ) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        G: FnOnce(BreakerError<E>) -> BreakerResult<T, E>,
        E: Display,
    {
        self.call_async_inner(operation, Some(fallback)).await
    }

    async fn call_async_inner<F, Fut, G, T, E>(
        &self,
        operation: F,
        fallback: Option<G>,
    ) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        G: FnOnce(BreakerError<E>) -> BreakerResult<T, E>,
        E: Display,
    {
        if let Err(open) = self.pre_call() {
            return self.blocked(open, fallback);
        }

        // The lock is not held while the operation runs.
        let result = operation().await;
        self.post_call(result, fallback)
    }
}
