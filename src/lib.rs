//! # circuit-guard
//!
//! A thread-safe circuit breaker with two accounting strategies and a
//! synchronous event channel.
//!
//! A breaker wraps calls to an unreliable dependency and decides, per call,
//! whether to run it, block it with an immediate fallback, or let it probe
//! recovery. It moves between three states:
//!
//! - **Closed**: Normal operation. Calls pass through to the protected resource.
//! - **Open**: Calls are immediately rejected without attempting to reach the resource.
//! - **Half-Open**: After the reset timeout, the next call probes the resource.
//!   Its outcome closes or re-opens the circuit.
//!
//! Transitions happen lazily, when a caller interacts with the breaker. There
//! is no background timer.
//!
//! ## Strategies
//!
//! - [`CountPolicy`] trips after `failureThreshold` consecutive failures.
//! - [`TimeWindowPolicy`] trips when the ratio of failed calls inside a
//!   trailing time window reaches `failureThreshold`.
//!
//! ## Basic Usage
//!
//! ```rust
//! use circuit_guard::{BreakerConfig, BreakerError, BreakerFactory};
//!
//! let factory = BreakerFactory::default();
//! let breaker = factory
//!     .create(
//!         "count",
//!         "inventory",
//!         &BreakerConfig::new()
//!             .with("failureThreshold", 3)
//!             .with("resetTimeout", 30),
//!     )
//!     .expect("valid configuration");
//!
//! match breaker.call(|| Ok::<_, std::io::Error>("stock level")) {
//!     Ok(result) => println!("Call succeeded: {}", result),
//!     Err(BreakerError::Open(err)) => println!("Call was prevented: {}", err),
//!     Err(BreakerError::Operation(err)) => println!("Call failed: {}", err),
//! }
//!
//! // A fallback sees the triggering error and produces the caller's result.
//! let cached = breaker.call_with_fallback(
//!     || Err::<&str, _>(std::io::Error::other("timed out")),
//!     |_err| Ok("cached stock level"),
//! );
//! assert_eq!(cached.unwrap(), "cached stock level");
//! ```
//!
//! ## Events
//!
//! Every breaker publishes to an [`EventBus`]: state changes, blocked
//! requests, successes and failures. Listeners are registered per
//! [`EventKind`] and called synchronously. State changes are delivered while
//! the breaker's lock is held, in the order they happened; the lock is
//! reentrant, so a listener may call back into the breaker.
//!
//! ## Features
//!
//! - `async` - `call_async` and `call_async_with_fallback`
//! - `prometheus` - Prometheus counters fed from the event bus

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod clock;
mod config;
mod error;
mod event;
mod factory;
#[cfg(feature = "prometheus")]
mod metrics;
mod policy;
pub mod prelude;
pub mod runtime;
mod state;
mod window;

// Re-exports
pub use breaker::CircuitBreaker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BreakerBuilder, BreakerConfig, ConfigValue, FAILURE_THRESHOLD, FAILURE_WINDOW, RESET_TIMEOUT,
};
pub use error::{BreakerError, BreakerResult, CircuitOpenError, ConfigError};
pub use event::{BreakerEvent, EventBus, EventDetail, EventKind, BLOCKED_REASON};
pub use factory::{
    BreakerFactory, BreakerKind, DEFAULT_COUNT_THRESHOLD, DEFAULT_FAILURE_WINDOW,
    DEFAULT_RATIO_THRESHOLD, DEFAULT_RESET_TIMEOUT,
};
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusListener;
pub use policy::{BreakerPolicy, CountPolicy, PolicyContext, PolicySnapshot, TimeWindowPolicy};
pub use state::{State, StateMachine, Transition};
pub use window::{Outcome, OutcomeWindow};
