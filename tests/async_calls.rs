#![cfg(feature = "async")]

use circuit_guard::{BreakerError, CircuitBreaker, CountPolicy, ManualClock, State};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test error: {}", self.0)
    }
}

impl std::error::Error for TestError {}

fn breaker(clock: &ManualClock) -> CircuitBreaker<CountPolicy> {
    CircuitBreaker::builder("async")
        .clock(Arc::new(clock.clone()))
        .build(CountPolicy::new(2, Duration::from_secs(1)))
}

#[tokio::test]
async fn test_async_circuit_breaker() {
    let clock = ManualClock::new();
    let breaker = breaker(&clock);

    for _ in 0..5 {
        let result = breaker
            .call_async(|| async { Result::<String, TestError>::Ok("success".to_string()) })
            .await;
        assert_ok!(result);
    }

    for _ in 0..2 {
        let result = breaker
            .call_async(|| async { Result::<String, TestError>::Err(TestError("error")) })
            .await;
        assert!(matches!(result, Err(BreakerError::Operation(_))));
    }
    assert_eq!(breaker.state(), State::Open);

    let result = breaker
        .call_async(|| async { Result::<String, TestError>::Ok("success".to_string()) })
        .await;
    assert!(matches!(assert_err!(result), BreakerError::Open(_)));

    clock.advance(Duration::from_secs(2));
    let result = breaker
        .call_async(|| async {
            tokio::task::yield_now().await;
            Result::<String, TestError>::Ok("recovered".to_string())
        })
        .await;
    assert_eq!(assert_ok!(result), "recovered");
    assert_eq!(breaker.state(), State::Closed);
}

#[tokio::test]
async fn test_async_fallback_on_blocked_call() {
    let clock = ManualClock::new();
    let breaker = breaker(&clock);

    for _ in 0..2 {
        let _ = breaker
            .call_async(|| async { Err::<u32, _>(TestError("error")) })
            .await;
    }

    let result = breaker
        .call_async_with_fallback(|| async { Ok::<u32, TestError>(1) }, |err| {
            assert!(err.is_open());
            Ok(0)
        })
        .await;
    assert_eq!(assert_ok!(result), 0);
}

#[tokio::test]
async fn test_async_shared_across_tasks() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::builder("tasks")
        .clock(Arc::new(clock.clone()))
        .build(CountPolicy::new(1_000, Duration::from_secs(1)));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let task_breaker = breaker.clone();
            tokio::spawn(async move {
                task_breaker
                    .call_async(|| async { Ok::<_, TestError>(()) })
                    .await
                    .is_ok()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(breaker.state(), State::Closed);
}
