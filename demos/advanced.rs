//! Advanced Circuit Breaker Example
//!
//! This example demonstrates:
//! 1. Routing calls through the breaker selected by runtime toggles
//! 2. Injecting simulated errors in front of a healthy operation
//! 3. Listening to breaker events per kind
//! 4. Handling blocked calls with a fallback

use circuit_guard::runtime::{FaultInjector, InjectedFault, RuntimeConfig, RuntimeSettings, RuntimeUpdate};
use circuit_guard::{
    BreakerConfig, BreakerError, BreakerFactory, BreakerKind, CircuitBreaker, EventDetail,
    EventKind,
};
use std::error::Error;
use std::fmt;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
enum ServiceError {
    Injected(InjectedFault),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Injected(fault) => write!(f, "Service error: {}", fault),
        }
    }
}

impl Error for ServiceError {}

impl From<InjectedFault> for ServiceError {
    fn from(fault: InjectedFault) -> Self {
        ServiceError::Injected(fault)
    }
}

fn lookup_user(id: u32) -> Result<String, ServiceError> {
    Ok(format!("user-{}", id))
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("=== Advanced Circuit Breaker Example ===\n");

    let factory = BreakerFactory::default();

    // 1. Listen to the events every breaker from this factory publishes
    let events = factory.events();
    events.subscribe(EventKind::StateChanged, |event| {
        if let EventDetail::StateChanged { from, to } = event.detail() {
            println!("📢 {} moved from {} to {}", event.breaker(), from, to);
        }
    });
    events.subscribe(EventKind::RequestBlocked, |event| {
        println!("🚫 {} blocked a request", event.breaker());
    });
    events.subscribe(EventKind::Failure, |event| {
        if let EventDetail::Failure { cause } = event.detail() {
            println!("❌ {} recorded failure: {}", event.breaker(), cause);
        }
    });

    // 2. One breaker per strategy, both guarding the same dependency
    let count_breaker = factory.create_kind(
        BreakerKind::CountBased,
        "users-count",
        &BreakerConfig::new()
            .with("failureThreshold", 3)
            .with("resetTimeout", 1),
    )?;
    let time_breaker = factory.create_kind(
        BreakerKind::TimeWindow,
        "users-window",
        &BreakerConfig::new()
            .with("failureThreshold", 0.5)
            .with("failureWindow", 10)
            .with("resetTimeout", 1),
    )?;

    // 3. Runtime toggles start out injecting errors on every call
    let runtime = RuntimeConfig::new(RuntimeSettings {
        current_breaker: BreakerKind::TimeWindow,
        error_rate: 1.0,
        random_error_enabled: true,
        ..RuntimeSettings::default()
    });

    for i in 1..=12 {
        if i == 6 {
            println!("\n--- Turning simulated errors off ---");
            runtime.update(RuntimeUpdate {
                random_error_enabled: Some(false),
                ..RuntimeUpdate::default()
            });
            thread::sleep(Duration::from_millis(2100));
        }
        if i == 10 {
            println!("\n--- Switching to the count-based breaker ---");
            runtime.update(RuntimeUpdate {
                current_breaker: Some(BreakerKind::CountBased),
                ..RuntimeUpdate::default()
            });
        }

        let breaker: &CircuitBreaker = match runtime.current_breaker() {
            BreakerKind::CountBased => &count_breaker,
            BreakerKind::TimeWindow => &time_breaker,
        };
        let injector = FaultInjector::new(runtime.snapshot());

        println!("\n--- Call {} via {} ---", i, breaker.name());
        let result = breaker.call_with_fallback(injector.wrap(|| lookup_user(i)), |err| match err {
            BreakerError::Open(open) => Ok(format!("cached user ({})", open)),
            other => Err(other),
        });

        match result {
            Ok(user) => println!("🔄 {}", user),
            Err(err) => println!("🔄 {}", err),
        }
        println!("Circuit: state={}, snapshot={:?}", breaker.state(), breaker.snapshot());
    }

    println!("\n=== Example Completed ===");
    Ok(())
}
