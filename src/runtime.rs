//! Runtime toggles a caller consults before handing work to a breaker.
//!
//! Breakers never read these settings. A caller takes a [`RuntimeSettings`]
//! snapshot and wraps its operation with a [`FaultInjector`], which can fail
//! the operation or slow it down to exercise the breaker.

use parking_lot::RwLock;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::factory::BreakerKind;

/// The current values of every runtime toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    /// Strategy callers should route through.
    pub current_breaker: BreakerKind,
    /// Probability in `[0, 1]` of a simulated error when enabled.
    pub error_rate: f32,
    /// Whether simulated errors are injected.
    pub random_error_enabled: bool,
    /// Whether simulated latency is injected.
    pub time_delay_enabled: bool,
    /// Latency added when delays are enabled.
    pub operation_delay: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            current_breaker: BreakerKind::CountBased,
            error_rate: 0.5,
            random_error_enabled: false,
            time_delay_enabled: false,
            operation_delay: Duration::from_millis(3000),
        }
    }
}

/// A partial update; `None` leaves a setting untouched.
#[derive(Debug, Clone, Default)]
pub struct RuntimeUpdate {
    /// New routing strategy.
    pub current_breaker: Option<BreakerKind>,
    /// New error probability, clamped to `[0, 1]`.
    pub error_rate: Option<f32>,
    /// Enable or disable simulated errors.
    pub random_error_enabled: Option<bool>,
    /// Enable or disable simulated latency.
    pub time_delay_enabled: Option<bool>,
    /// New simulated latency.
    pub operation_delay: Option<Duration>,
}

/// Shared, thread-safe handle to the runtime settings.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    settings: Arc<RwLock<RuntimeSettings>>,
}

impl RuntimeConfig {
    /// Creates a handle holding `initial`.
    pub fn new(initial: RuntimeSettings) -> Self {
        tracing::info!(settings = ?initial, "runtime configuration initialised");
        Self {
            settings: Arc::new(RwLock::new(initial)),
        }
    }

    /// A consistent copy of every setting.
    pub fn snapshot(&self) -> RuntimeSettings {
        self.settings.read().clone()
    }

    /// Strategy callers should currently route through.
    pub fn current_breaker(&self) -> BreakerKind {
        self.settings.read().current_breaker
    }

    /// Applies `update` atomically and returns the resulting settings.
    pub fn update(&self, update: RuntimeUpdate) -> RuntimeSettings {
        let mut settings = self.settings.write();

        if let Some(kind) = update.current_breaker {
            settings.current_breaker = kind;
        }
        if let Some(rate) = update.error_rate {
            settings.error_rate = rate.clamp(0.0, 1.0);
        }
        if let Some(enabled) = update.random_error_enabled {
            settings.random_error_enabled = enabled;
        }
        if let Some(enabled) = update.time_delay_enabled {
            settings.time_delay_enabled = enabled;
        }
        if let Some(delay) = update.operation_delay {
            settings.operation_delay = delay;
        }

        let snapshot = settings.clone();
        tracing::warn!(settings = ?snapshot, "runtime configuration changed");
        snapshot
    }
}

/// Error produced by a [`FaultInjector`] instead of running the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFault {
    /// A simulated dependency failure.
    SimulatedError,
}

impl Display for InjectedFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InjectedFault::SimulatedError => write!(f, "Simulated external service error"),
        }
    }
}

impl Error for InjectedFault {}

/// Wraps operations with the faults enabled in a settings snapshot.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    settings: RuntimeSettings,
}

impl FaultInjector {
    /// Creates an injector for one snapshot of the settings.
    pub fn new(settings: RuntimeSettings) -> Self {
        Self { settings }
    }

    /// Returns `operation` preceded by the configured fault.
    ///
    /// With errors enabled the wrapper fails with probability `error_rate`
    /// without running `operation`. Otherwise, with delays enabled, it sleeps
    /// for `operation_delay` first.
    pub fn wrap<F, T, E>(&self, operation: F) -> impl FnOnce() -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<InjectedFault>,
    {
        let settings = self.settings.clone();
        move || {
            if settings.random_error_enabled && fastrand::f32() < settings.error_rate {
                tracing::debug!(error_rate = settings.error_rate, "injecting simulated error");
                return Err(InjectedFault::SimulatedError.into());
            }

            if settings.time_delay_enabled {
                tracing::debug!(delay = ?settings.operation_delay, "injecting simulated delay");
                std::thread::sleep(settings.operation_delay);
            }

            operation()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_is_partial_and_clamped() {
        let config = RuntimeConfig::default();
        let updated = config.update(RuntimeUpdate {
            current_breaker: Some(BreakerKind::TimeWindow),
            error_rate: Some(4.0),
            ..RuntimeUpdate::default()
        });

        assert_eq!(updated.current_breaker, BreakerKind::TimeWindow);
        assert_eq!(updated.error_rate, 1.0);
        assert!(!updated.time_delay_enabled);
        assert_eq!(config.snapshot(), updated);
        assert_eq!(config.current_breaker(), BreakerKind::TimeWindow);
    }

    #[test]
    fn certain_error_skips_operation() {
        let injector = FaultInjector::new(RuntimeSettings {
            error_rate: 1.0,
            random_error_enabled: true,
            ..RuntimeSettings::default()
        });

        let mut ran = false;
        let result: Result<(), InjectedFault> = injector.wrap(|| {
            ran = true;
            Ok(())
        })();

        assert_eq!(result, Err(InjectedFault::SimulatedError));
        assert!(!ran);
    }

    #[test]
    fn disabled_faults_run_operation() {
        let injector = FaultInjector::new(RuntimeSettings {
            error_rate: 1.0,
            random_error_enabled: false,
            ..RuntimeSettings::default()
        });

        let result: Result<u8, InjectedFault> = injector.wrap(|| Ok(7))();
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn zero_delay_still_runs() {
        let injector = FaultInjector::new(RuntimeSettings {
            time_delay_enabled: true,
            operation_delay: Duration::ZERO,
            ..RuntimeSettings::default()
        });

        let result: Result<&str, InjectedFault> = injector.wrap(|| Ok("ok"))();
        assert_eq!(result, Ok("ok"));
    }
}
