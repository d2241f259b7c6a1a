//! Event channel for circuit breaker observability.

use ahash::AHashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;

use crate::state::State;

type Listener = Arc<dyn Fn(&BreakerEvent) + Send + Sync + 'static>;

/// Reason attached to every blocked-request event.
pub const BLOCKED_REASON: &str = "Circuit is OPEN";

/// The kinds of events a breaker publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The breaker moved between states.
    StateChanged,
    /// A call was refused without running the operation.
    RequestBlocked,
    /// The operation returned normally.
    Success,
    /// The operation returned an error.
    Failure,
}

impl EventKind {
    /// Every event kind, in declaration order.
    pub const ALL: [EventKind; 4] = [
        EventKind::StateChanged,
        EventKind::RequestBlocked,
        EventKind::Success,
        EventKind::Failure,
    ];
}

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDetail {
    /// The breaker moved from `from` to `to`.
    StateChanged {
        /// Previous state.
        from: State,
        /// New state.
        to: State,
    },
    /// A call was refused.
    RequestBlocked {
        /// State at the time of the refusal.
        state: State,
        /// Human readable reason.
        reason: &'static str,
    },
    /// A call succeeded.
    Success,
    /// A call failed.
    Failure {
        /// Rendered error of the failed operation.
        cause: String,
    },
}

/// A single immutable event record.
#[derive(Debug, Clone)]
pub struct BreakerEvent {
    breaker: Arc<str>,
    timestamp: Instant,
    detail: EventDetail,
}

impl BreakerEvent {
    pub(crate) fn new(breaker: Arc<str>, timestamp: Instant, detail: EventDetail) -> Self {
        Self {
            breaker,
            timestamp,
            detail,
        }
    }

    /// Name of the breaker that emitted the event.
    pub fn breaker(&self) -> &str {
        &self.breaker
    }

    /// When the event was created, according to the breaker's clock.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// The payload.
    pub fn detail(&self) -> &EventDetail {
        &self.detail
    }

    /// The kind, used to route the event to listeners.
    pub fn kind(&self) -> EventKind {
        match self.detail {
            EventDetail::StateChanged { .. } => EventKind::StateChanged,
            EventDetail::RequestBlocked { .. } => EventKind::RequestBlocked,
            EventDetail::Success => EventKind::Success,
            EventDetail::Failure { .. } => EventKind::Failure,
        }
    }
}

/// A registry of listeners keyed by event kind.
///
/// Delivery is synchronous and in registration order. Listeners run on the
/// calling thread, so they should stay cheap.
pub struct EventBus {
    listeners: RwLock<AHashMap<EventKind, SmallVec<[Listener; 2]>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            map.entry(&kind, &listeners.get(&kind).map_or(0, |l| l.len()));
        }
        map.finish()
    }
}

impl EventBus {
    /// Creates a new bus with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(AHashMap::new()),
        }
    }

    /// Registers a listener for one kind of event.
    pub fn subscribe<F>(&self, kind: EventKind, f: F)
    where
        F: Fn(&BreakerEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(f));
    }

    /// Registers the same listener for every kind of event.
    pub fn subscribe_all<F>(&self, f: F)
    where
        F: Fn(&BreakerEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(f);
        let mut listeners = self.listeners.write();
        for kind in EventKind::ALL {
            listeners
                .entry(kind)
                .or_default()
                .push(Arc::clone(&listener));
        }
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, |l| l.len())
    }

    /// Registers a listener that writes every event to `tracing`.
    pub fn attach_tracing(&self) {
        self.subscribe_all(log_event);
    }

    /// Delivers an event to the listeners of its kind.
    pub fn publish(&self, event: &BreakerEvent) {
        // Snapshot so a listener may subscribe without deadlocking on the lock.
        let targets: SmallVec<[Listener; 2]> = match self.listeners.read().get(&event.kind()) {
            Some(listeners) => listeners.clone(),
            None => return,
        };

        for listener in targets {
            listener(event);
        }
    }
}

fn log_event(event: &BreakerEvent) {
    match event.detail() {
        EventDetail::StateChanged { from, to } => {
            tracing::info!(breaker = %event.breaker(), %from, %to, "circuit breaker state changed");
        }
        EventDetail::RequestBlocked { state, reason } => {
            tracing::info!(breaker = %event.breaker(), %state, reason, "circuit breaker blocked request");
        }
        EventDetail::Success => {
            tracing::debug!(breaker = %event.breaker(), "circuit breaker call succeeded");
        }
        EventDetail::Failure { cause } => {
            tracing::info!(breaker = %event.breaker(), cause = %cause, "circuit breaker call failed");
        }
    }
}
