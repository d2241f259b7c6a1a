use circuit_guard::{BreakerConfig, BreakerError, BreakerFactory};
use std::error::Error;
use std::fmt;
use std::thread;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let factory = BreakerFactory::default();
    factory.events().attach_tracing();

    // Trip after 3 consecutive failures, probe again after more than 1 second
    let breaker = factory.create(
        "count",
        "inventory",
        &BreakerConfig::new()
            .with("failureThreshold", 3)
            .with("resetTimeout", 1),
    )?;

    println!("Circuit initial state: {}", breaker.state());

    let mut counter = 0u32;
    let mut call_service = || -> Result<String, ServiceError> {
        counter += 1;
        if (4..=7).contains(&counter) {
            Err(ServiceError("External service error".to_string()))
        } else {
            Ok(format!("Success #{}", counter))
        }
    };

    for i in 1..=15 {
        println!("\nAttempt {}: ", i);

        match breaker.call(&mut call_service) {
            Ok(result) => println!("Call succeeded with result: {}", result),
            Err(BreakerError::Open(err)) => {
                println!("{}, waiting before retry...", err);
                thread::sleep(Duration::from_millis(700));
            }
            Err(BreakerError::Operation(err)) => {
                println!("Call failed with error: {}", err);
            }
        }

        println!("Current state: {}, snapshot: {:?}", breaker.state(), breaker.snapshot());
    }

    Ok(())
}
