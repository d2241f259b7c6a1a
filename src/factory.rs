//! Builds configured breakers by strategy name.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::config::{BreakerConfig, FAILURE_THRESHOLD, FAILURE_WINDOW, RESET_TIMEOUT};
use crate::error::ConfigError;
use crate::event::EventBus;
use crate::policy::{BreakerPolicy, CountPolicy, TimeWindowPolicy};

/// Default failure count for count-based breakers.
pub const DEFAULT_COUNT_THRESHOLD: u32 = 5;
/// Default failure ratio for time-window breakers.
pub const DEFAULT_RATIO_THRESHOLD: f64 = 0.5;
/// Default reset timeout for both strategies.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);
/// Default failure window for time-window breakers.
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// The available accounting strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerKind {
    /// Consecutive failure counting, see [`CountPolicy`].
    CountBased,
    /// Failure ratio over a time window, see [`TimeWindowPolicy`].
    TimeWindow,
}

impl BreakerKind {
    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerKind::CountBased => "count-based",
            BreakerKind::TimeWindow => "time-window",
        }
    }
}

impl Display for BreakerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" | "count-based" | "count_based" | "countbased" => Ok(BreakerKind::CountBased),
            "time" | "time-window" | "time_window" | "timewindow" => Ok(BreakerKind::TimeWindow),
            _ => Err(ConfigError::UnknownKind(s.to_string())),
        }
    }
}

/// Creates independent breakers that share one clock and one event bus.
///
/// Nothing is cached: every call to [`create`](Self::create) returns a new
/// breaker with its own state.
#[derive(Clone)]
pub struct BreakerFactory {
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl Default for BreakerFactory {
    fn default() -> Self {
        Self::new(Arc::new(EventBus::new()))
    }
}

impl BreakerFactory {
    /// Creates a factory publishing to `events`, using the system clock.
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock handed to new breakers.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The shared event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Creates a breaker from a strategy name such as `"count"` or `"time-window"`.
    pub fn create(
        &self,
        kind: &str,
        name: impl Into<String>,
        config: &BreakerConfig,
    ) -> Result<CircuitBreaker, ConfigError> {
        self.create_kind(kind.parse()?, name, config)
    }

    /// Creates a breaker of a known strategy.
    pub fn create_kind(
        &self,
        kind: BreakerKind,
        name: impl Into<String>,
        config: &BreakerConfig,
    ) -> Result<CircuitBreaker, ConfigError> {
        let name = name.into();
        let policy = build_policy(kind, config)?;
        tracing::debug!(breaker = %name, %kind, "created circuit breaker");

        Ok(CircuitBreaker::new(
            name,
            policy,
            Arc::clone(&self.clock),
            Arc::clone(&self.events),
        ))
    }
}

fn build_policy(
    kind: BreakerKind,
    config: &BreakerConfig,
) -> Result<Box<dyn BreakerPolicy>, ConfigError> {
    let recognised: &[&str] = match kind {
        BreakerKind::CountBased => &[FAILURE_THRESHOLD, RESET_TIMEOUT],
        BreakerKind::TimeWindow => &[FAILURE_THRESHOLD, RESET_TIMEOUT, FAILURE_WINDOW],
    };
    for key in config.keys().filter(|key| !recognised.contains(key)) {
        tracing::debug!(%kind, key, "ignoring unrecognised configuration key");
    }

    let reset_timeout = config.seconds(RESET_TIMEOUT, DEFAULT_RESET_TIMEOUT)?;

    Ok(match kind {
        BreakerKind::CountBased => Box::new(CountPolicy::new(
            config.count(FAILURE_THRESHOLD, DEFAULT_COUNT_THRESHOLD)?,
            reset_timeout,
        )),
        BreakerKind::TimeWindow => Box::new(TimeWindowPolicy::new(
            config.ratio(FAILURE_THRESHOLD, DEFAULT_RATIO_THRESHOLD)?,
            config.seconds(FAILURE_WINDOW, DEFAULT_FAILURE_WINDOW)?,
            reset_timeout,
        )),
    })
}
