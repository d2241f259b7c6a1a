//! Prometheus counters fed from the event bus.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::event::{EventBus, EventDetail, EventKind};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CallLabels {
    breaker: String,
    outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TransitionLabels {
    breaker: String,
    from: String,
    to: String,
}

/// Counts calls and state transitions per breaker.
#[derive(Clone, Default)]
pub struct PrometheusListener {
    calls: Family<CallLabels, Counter>,
    transitions: Family<TransitionLabels, Counter>,
}

impl PrometheusListener {
    /// Registers the counters and subscribes them to every event kind.
    pub fn register(registry: &mut Registry, bus: &EventBus) -> Self {
        let listener = Self::default();

        registry.register(
            "circuit_breaker_calls",
            "Calls seen by circuit breakers, by outcome",
            listener.calls.clone(),
        );
        registry.register(
            "circuit_breaker_transitions",
            "Circuit breaker state transitions",
            listener.transitions.clone(),
        );

        let calls = listener.calls.clone();
        let transitions = listener.transitions.clone();
        bus.subscribe_all(move |event| {
            let breaker = event.breaker().to_string();
            match event.detail() {
                EventDetail::StateChanged { from, to } => {
                    transitions
                        .get_or_create(&TransitionLabels {
                            breaker,
                            from: from.as_str().to_string(),
                            to: to.as_str().to_string(),
                        })
                        .inc();
                }
                _ => {
                    let outcome = match event.kind() {
                        EventKind::Success => "success",
                        EventKind::Failure => "failure",
                        _ => "blocked",
                    };
                    calls
                        .get_or_create(&CallLabels {
                            breaker,
                            outcome: outcome.to_string(),
                        })
                        .inc();
                }
            }
        });

        listener
    }

    /// Calls recorded for `breaker` with `outcome` (`success`, `failure`, `blocked`).
    pub fn calls(&self, breaker: &str, outcome: &str) -> u64 {
        self.calls
            .get_or_create(&CallLabels {
                breaker: breaker.to_string(),
                outcome: outcome.to_string(),
            })
            .get()
    }
}
