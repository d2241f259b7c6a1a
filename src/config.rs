//! Configuration for circuit breakers.

use ahash::AHashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::event::EventBus;
use crate::policy::BreakerPolicy;

/// Key for the failure threshold: a count for count-based breakers, a ratio
/// for time-window breakers.
pub const FAILURE_THRESHOLD: &str = "failureThreshold";
/// Key for the reset timeout, in seconds.
pub const RESET_TIMEOUT: &str = "resetTimeout";
/// Key for the failure window, in seconds. Time-window breakers only.
pub const FAILURE_WINDOW: &str = "failureWindow";

/// A single configuration value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigValue {
    /// An integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
}

macro_rules! int_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ConfigValue {
                fn from(value: $ty) -> Self {
                    ConfigValue::Int(i64::from(value))
                }
            }
        )*
    };
}

int_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for ConfigValue {
    fn from(value: f32) -> Self {
        ConfigValue::Float(f64::from(value))
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

/// String-keyed configuration bag handed to the factory once per breaker.
///
/// Missing keys fall back to the per-type defaults; present keys are checked
/// for type and range.
#[derive(Debug, Clone, Default)]
pub struct BreakerConfig {
    values: AHashMap<String, ConfigValue>,
}

impl BreakerConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Adds or replaces an entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw access to an entry.
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.get(key).copied()
    }

    /// Iterates over the keys present.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Reads a positive integer count.
    pub fn count(&self, key: &str, default: u32) -> Result<u32, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(ConfigValue::Int(v)) if v >= 1 => {
                u32::try_from(v).map_err(|_| ConfigError::OutOfRange {
                    key: key.to_string(),
                    reason: format!("{} does not fit in 32 bits", v),
                })
            }
            Some(ConfigValue::Int(v)) => Err(ConfigError::OutOfRange {
                key: key.to_string(),
                reason: format!("{} must be at least 1", v),
            }),
            Some(ConfigValue::Float(_)) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "an integer",
            }),
        }
    }

    /// Reads a ratio in `[0, 1]`. Integers are accepted.
    pub fn ratio(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        let value = match self.get(key) {
            None => return Ok(default),
            Some(ConfigValue::Int(v)) => v as f64,
            Some(ConfigValue::Float(v)) => v,
        };

        if (0.0..=1.0).contains(&value) {
            Ok(value)
        } else {
            Err(ConfigError::OutOfRange {
                key: key.to_string(),
                reason: format!("{} is not within [0, 1]", value),
            })
        }
    }

    /// Reads a positive whole number of seconds.
    pub fn seconds(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(ConfigValue::Int(v)) if v >= 1 => Ok(Duration::from_secs(v.unsigned_abs())),
            Some(ConfigValue::Int(v)) => Err(ConfigError::OutOfRange {
                key: key.to_string(),
                reason: format!("{} seconds is not positive", v),
            }),
            Some(ConfigValue::Float(_)) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "whole seconds",
            }),
        }
    }
}

/// Builder for creating circuit breakers with a custom clock or event bus.
pub struct BreakerBuilder {
    name: String,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl BreakerBuilder {
    /// Creates a new builder with the system clock and a private event bus.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clock: Arc::new(SystemClock),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Sets the clock used for timeouts and windows.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the event bus the breaker publishes to.
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Builds a circuit breaker driven by `policy`.
    pub fn build<P: BreakerPolicy>(self, policy: P) -> CircuitBreaker<P> {
        CircuitBreaker::new(self.name, policy, self.clock, self.events)
    }
}
