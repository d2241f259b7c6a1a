//! Re-exports common types for convenient usage.
//!
//! # Example
//! ```rust,no_run
//! use circuit_guard::prelude::*;
//!
//! let breaker = BreakerFactory::default()
//!     .create_kind(BreakerKind::TimeWindow, "search", &BreakerConfig::new())
//!     .unwrap();
//! assert_eq!(breaker.state(), State::Closed);
//! ```

pub use crate::{
    BreakerConfig, BreakerError, BreakerEvent, BreakerFactory, BreakerKind, BreakerResult,
    CircuitBreaker, CircuitOpenError, EventBus, EventKind, State,
};
