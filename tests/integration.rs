use circuit_guard::{
    BreakerConfig, BreakerError, BreakerEvent, BreakerFactory, CircuitBreaker, CountPolicy,
    EventBus, EventDetail, EventKind, ManualClock, PolicySnapshot, State, TimeWindowPolicy,
    BLOCKED_REASON,
};
use parking_lot::Mutex;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug, PartialEq)]
struct TestError(String);

impl TestError {
    fn new(msg: &str) -> Self {
        TestError(msg.to_string())
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test error: {}", self.0)
    }
}

impl Error for TestError {}

fn succeed() -> Result<String, TestError> {
    Ok("success".to_string())
}

fn fail() -> Result<String, TestError> {
    Err(TestError::new("Simulated failure"))
}

/// Collects every event published on a bus.
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<BreakerEvent>>>,
}

impl Recorder {
    fn attach(bus: &EventBus) -> Self {
        let recorder = Recorder::default();
        let sink = Arc::clone(&recorder.events);
        bus.subscribe_all(move |event| sink.lock().push(event.clone()));
        recorder
    }

    fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind()).collect()
    }

    fn transitions(&self) -> Vec<(State, State)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e.detail() {
                EventDetail::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    fn count(&self, kind: EventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

fn count_breaker(threshold: u32, reset_secs: u64) -> (CircuitBreaker<CountPolicy>, ManualClock, Recorder) {
    let clock = ManualClock::new();
    let bus = Arc::new(EventBus::new());
    let recorder = Recorder::attach(&bus);
    let breaker = CircuitBreaker::builder("testCountCB")
        .clock(Arc::new(clock.clone()))
        .events(bus)
        .build(CountPolicy::new(threshold, Duration::from_secs(reset_secs)));
    (breaker, clock, recorder)
}

fn time_breaker(
    threshold: f64,
    window_secs: u64,
    reset_secs: u64,
) -> (CircuitBreaker<TimeWindowPolicy>, ManualClock, Recorder) {
    let clock = ManualClock::new();
    let bus = Arc::new(EventBus::new());
    let recorder = Recorder::attach(&bus);
    let breaker = CircuitBreaker::builder("testTimeCB")
        .clock(Arc::new(clock.clone()))
        .events(bus)
        .build(TimeWindowPolicy::new(
            threshold,
            Duration::from_secs(window_secs),
            Duration::from_secs(reset_secs),
        ));
    (breaker, clock, recorder)
}

#[test]
fn count_breaker_closed_success_publishes_success() {
    let (breaker, _clock, recorder) = count_breaker(3, 5);

    let result = breaker.call(succeed);

    assert_eq!(result.unwrap(), "success");
    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(recorder.kinds(), vec![EventKind::Success]);
    assert_eq!(recorder.events.lock()[0].breaker(), "testCountCB");
}

#[test]
fn count_breaker_stays_closed_below_threshold() {
    let (breaker, _clock, recorder) = count_breaker(3, 5);

    for _ in 0..2 {
        let result = breaker.call(fail);
        assert!(matches!(result, Err(BreakerError::Operation(_))));
    }

    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(breaker.failure_count(), 2);
    assert_eq!(recorder.count(EventKind::Failure), 2);
    assert!(recorder.transitions().is_empty());
}

#[test]
fn count_breaker_full_cycle() {
    let (breaker, clock, recorder) = count_breaker(3, 5);

    for _ in 0..3 {
        let _ = breaker.call(fail);
    }
    assert_eq!(breaker.state(), State::Open);
    assert!(!breaker.allow_request());

    clock.advance(Duration::from_secs(5));
    assert!(!breaker.allow_request());

    clock.advance(Duration::from_secs(1));
    assert!(breaker.allow_request());
    assert_eq!(breaker.state(), State::HalfOpen);
    assert_eq!(breaker.failure_count(), 0);

    let result = breaker.call(succeed);
    assert!(result.is_ok());
    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(breaker.failure_count(), 0);
    assert!(matches!(
        breaker.snapshot(),
        PolicySnapshot::Count {
            failure_count: 0,
            last_failure_time: None
        }
    ));

    assert_eq!(
        recorder.transitions(),
        vec![
            (State::Closed, State::Open),
            (State::Open, State::HalfOpen),
            (State::HalfOpen, State::Closed),
        ]
    );
}

#[test]
fn count_breaker_half_open_failure_reopens() {
    let (breaker, clock, recorder) = count_breaker(1, 5);

    let _ = breaker.call(fail);
    assert_eq!(breaker.state(), State::Open);

    clock.advance(Duration::from_secs(6));
    let result = breaker.call(fail);
    assert_eq!(
        result.unwrap_err().into_operation(),
        Some(TestError::new("Simulated failure"))
    );
    assert_eq!(breaker.state(), State::Open);

    // The timeout restarts from the failed probe.
    clock.advance(Duration::from_secs(5));
    assert!(!breaker.allow_request());
    clock.advance(Duration::from_secs(1));
    assert!(breaker.allow_request());

    assert_eq!(
        recorder.transitions(),
        vec![
            (State::Closed, State::Open),
            (State::Open, State::HalfOpen),
            (State::HalfOpen, State::Open),
            (State::Open, State::HalfOpen),
        ]
    );
}

#[test]
fn count_breaker_ignores_outcomes_while_open() {
    let (breaker, _clock, recorder) = count_breaker(1, 5);
    let _ = breaker.call(fail);

    breaker.record_failure();
    breaker.record_success();

    assert_eq!(breaker.state(), State::Open);
    assert_eq!(recorder.transitions().len(), 1);
}

#[test]
fn blocked_call_without_fallback_is_circuit_open() {
    let (breaker, _clock, recorder) = count_breaker(1, 5);
    let _ = breaker.call(fail);

    let mut ran = false;
    let result = breaker.call(|| {
        ran = true;
        succeed()
    });

    assert!(!ran);
    match result {
        Err(BreakerError::Open(err)) => {
            assert_eq!(err.name, "testCountCB");
            assert_eq!(err.state, State::Open);
        }
        other => panic!("expected open error, got {:?}", other),
    }

    let blocked: Vec<_> = recorder
        .events
        .lock()
        .iter()
        .filter(|e| e.kind() == EventKind::RequestBlocked)
        .map(|e| e.detail().clone())
        .collect();
    assert_eq!(
        blocked,
        vec![EventDetail::RequestBlocked {
            state: State::Open,
            reason: BLOCKED_REASON,
        }]
    );
}

#[test]
fn blocked_call_uses_fallback_result() {
    let (breaker, _clock, _recorder) = count_breaker(1, 5);
    let _ = breaker.call(fail);

    let result = breaker.call_with_fallback(succeed, |err| {
        assert!(err.is_open());
        Ok("fallback".to_string())
    });

    assert_eq!(result.unwrap(), "fallback");
}

#[test]
fn blocked_call_fallback_error_propagates() {
    let (breaker, _clock, _recorder) = count_breaker(1, 5);
    let _ = breaker.call(fail);

    let result = breaker.call_with_fallback(succeed, |_| {
        Err(BreakerError::Operation(TestError::new("fallback failed")))
    });

    assert_eq!(
        result.unwrap_err().into_operation(),
        Some(TestError::new("fallback failed"))
    );
}

#[test]
fn failed_call_uses_fallback_with_operation_error() {
    let (breaker, _clock, recorder) = count_breaker(3, 5);

    let result = breaker.call_with_fallback(fail, |err| match err {
        BreakerError::Operation(e) => Ok(format!("recovered from {}", e.0)),
        BreakerError::Open(_) => panic!("circuit should be closed"),
    });

    assert_eq!(result.unwrap(), "recovered from Simulated failure");
    assert_eq!(breaker.failure_count(), 1);

    let failures: Vec<_> = recorder
        .events
        .lock()
        .iter()
        .filter_map(|e| match e.detail() {
            EventDetail::Failure { cause } => Some(cause.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec!["Test error: Simulated failure".to_string()]);
}

#[test]
fn failed_call_fallback_error_takes_precedence() {
    let (breaker, _clock, _recorder) = count_breaker(3, 5);

    let result = breaker.call_with_fallback(fail, |_| {
        Err(BreakerError::Operation(TestError::new("fallback failed")))
    });

    assert_eq!(
        result.unwrap_err().into_operation(),
        Some(TestError::new("fallback failed"))
    );
}

#[test]
fn threshold_breach_then_fallback_on_blocked_calls() {
    let (breaker, _clock, recorder) = count_breaker(3, 5);
    let fallback = |_: BreakerError<TestError>| Ok("fallback".to_string());

    for _ in 0..3 {
        assert_eq!(breaker.call_with_fallback(fail, fallback).unwrap(), "fallback");
    }
    assert_eq!(breaker.state(), State::Open);

    assert_eq!(breaker.call_with_fallback(succeed, fallback).unwrap(), "fallback");
    assert_eq!(recorder.count(EventKind::RequestBlocked), 1);
    assert_eq!(recorder.count(EventKind::Failure), 3);
}

#[test]
fn time_breaker_single_failure_does_not_trip() {
    let (breaker, _clock, recorder) = time_breaker(0.1, 60, 5);

    let _ = breaker.call(fail);

    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(breaker.failure_rate(), 0.0);
    assert!(recorder.transitions().is_empty());
}

#[test]
fn time_breaker_trips_at_ratio() {
    let (breaker, _clock, recorder) = time_breaker(0.5, 60, 5);

    let _ = breaker.call(succeed);
    let _ = breaker.call(fail);

    assert_eq!(breaker.state(), State::Open);
    assert_eq!(recorder.transitions(), vec![(State::Closed, State::Open)]);

    // Opening clears the window.
    match breaker.snapshot() {
        PolicySnapshot::TimeWindow {
            total,
            last_open_time,
            ..
        } => {
            assert_eq!(total, 0);
            assert!(last_open_time.is_some());
        }
        other => panic!("unexpected snapshot {:?}", other),
    }
}

#[test]
fn time_breaker_stays_closed_below_ratio() {
    let (breaker, _clock, _recorder) = time_breaker(0.5, 60, 5);

    for _ in 0..3 {
        let _ = breaker.call(succeed);
    }
    let _ = breaker.call(fail);

    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(breaker.failure_rate(), 0.25);
}

#[test]
fn time_breaker_evicts_stale_outcomes() {
    let (breaker, clock, _recorder) = time_breaker(0.5, 10, 5);

    let _ = breaker.call(fail);
    clock.advance(Duration::from_secs(11));

    // The first failure is outside the window, so this one is alone again.
    let _ = breaker.call(fail);
    assert_eq!(breaker.state(), State::Closed);

    let _ = breaker.call(succeed);
    let _ = breaker.call(succeed);
    assert_eq!(breaker.state(), State::Closed);
    assert!((breaker.failure_rate() - 1.0 / 3.0).abs() < f64::EPSILON);

    clock.advance(Duration::from_secs(11));
    assert_eq!(breaker.failure_rate(), 0.0);
}

#[test]
fn time_breaker_recovers_through_half_open() {
    let (breaker, clock, recorder) = time_breaker(0.5, 60, 5);
    let _ = breaker.call(fail);
    let _ = breaker.call(fail);
    assert_eq!(breaker.state(), State::Open);

    assert!(breaker.call(succeed).unwrap_err().is_open());

    clock.advance(Duration::from_secs(6));
    assert_eq!(breaker.call(succeed).unwrap(), "success");
    assert_eq!(breaker.state(), State::Closed);

    match breaker.snapshot() {
        PolicySnapshot::TimeWindow {
            total,
            last_open_time,
            ..
        } => {
            assert_eq!(total, 0);
            assert_eq!(last_open_time, None);
        }
        other => panic!("unexpected snapshot {:?}", other),
    }

    assert_eq!(
        recorder.transitions(),
        vec![
            (State::Closed, State::Open),
            (State::Open, State::HalfOpen),
            (State::HalfOpen, State::Closed),
        ]
    );
}

#[test]
fn time_breaker_half_open_failure_reopens() {
    let (breaker, clock, recorder) = time_breaker(0.5, 60, 5);
    let _ = breaker.call(fail);
    let _ = breaker.call(fail);

    clock.advance(Duration::from_secs(6));
    assert!(breaker.allow_request());
    assert_eq!(breaker.state(), State::HalfOpen);

    let fallback_called = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&fallback_called);
    let result = breaker.call_with_fallback(fail, move |_| {
        *flag.lock() = true;
        Ok("fallback".to_string())
    });

    assert_eq!(result.unwrap(), "fallback");
    assert!(*fallback_called.lock());
    assert_eq!(breaker.state(), State::Open);
    assert_eq!(
        recorder.transitions().last(),
        Some(&(State::HalfOpen, State::Open))
    );
}

#[test]
fn factory_breakers_share_the_bus() {
    let bus = Arc::new(EventBus::new());
    let recorder = Recorder::attach(&bus);
    let factory = BreakerFactory::new(Arc::clone(&bus)).with_clock(Arc::new(ManualClock::new()));

    let count = factory
        .create("count", "users", &BreakerConfig::new().with("failureThreshold", 1))
        .unwrap();
    let time = factory
        .create("time-window", "orders", &BreakerConfig::new().with("failureThreshold", 0.2))
        .unwrap();

    let _ = count.call(fail);
    let _ = time.call(succeed);

    let names: Vec<String> = recorder
        .events
        .lock()
        .iter()
        .map(|e| e.breaker().to_string())
        .collect();
    assert_eq!(names, vec!["users", "users", "orders"]);
    assert_eq!(count.state(), State::Open);
}

#[test]
fn concurrent_callers_share_one_breaker() {
    let (breaker, _clock, recorder) = count_breaker(1_000_000, 60);

    const THREAD_COUNT: usize = 8;
    const ITERATIONS_PER_THREAD: usize = 500;

    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|i| {
            let thread_breaker = breaker.clone();
            thread::spawn(move || {
                for n in 0..ITERATIONS_PER_THREAD {
                    if (i + n) % 2 == 0 {
                        let _ = thread_breaker.call(succeed);
                    } else {
                        let _ = thread_breaker.call(fail);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(
        recorder.count(EventKind::Success) + recorder.count(EventKind::Failure),
        THREAD_COUNT * ITERATIONS_PER_THREAD
    );
}

#[test]
fn concurrent_failures_open_exactly_once() {
    let (breaker, _clock, recorder) = count_breaker(10, 60);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let thread_breaker = breaker.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let _ = thread_breaker.call(fail);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(breaker.state(), State::Open);
    assert_eq!(recorder.transitions(), vec![(State::Closed, State::Open)]);
}

#[test]
fn concurrent_transitions_are_published_in_order() {
    let (breaker, clock, recorder) = count_breaker(1, 1);
    breaker
        .events()
        .subscribe(EventKind::StateChanged, |_| thread::sleep(Duration::from_micros(50)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let thread_breaker = breaker.clone();
            let thread_clock = clock.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    thread_clock.advance(Duration::from_secs(2));
                    thread_breaker.allow_request();
                    thread_breaker.record_failure();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let transitions = recorder.transitions();
    assert!(transitions.len() > 1);
    assert_eq!(transitions[0], (State::Closed, State::Open));
    for pair in transitions.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "broken chain: {:?}", pair);
    }
    assert_eq!(transitions.last().map(|t| t.1), Some(breaker.state()));
}

#[test]
fn concurrent_time_window_outcomes_open_exactly_once() {
    let (breaker, _clock, recorder) = time_breaker(0.6, 60, 60);

    const THREAD_COUNT: usize = 8;
    const MIXED_CALLS: usize = 250;
    const FAILING_CALLS: usize = 100;

    // Every thread alternates starting with a success, so the ratio never
    // exceeds one half.
    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|_| {
            let thread_breaker = breaker.clone();
            thread::spawn(move || {
                for n in 0..MIXED_CALLS {
                    if n % 2 == 0 {
                        let _ = thread_breaker.call(succeed);
                    } else {
                        let _ = thread_breaker.call(fail);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(breaker.state(), State::Closed);
    assert!(recorder.transitions().is_empty());
    assert_eq!(
        recorder.count(EventKind::Success) + recorder.count(EventKind::Failure),
        THREAD_COUNT * MIXED_CALLS
    );
    assert_eq!(
        breaker.snapshot(),
        PolicySnapshot::TimeWindow {
            total: THREAD_COUNT * MIXED_CALLS,
            failed: THREAD_COUNT * MIXED_CALLS / 2,
            failure_rate: 0.5,
            last_open_time: None,
        }
    );

    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|_| {
            let thread_breaker = breaker.clone();
            thread::spawn(move || {
                for _ in 0..FAILING_CALLS {
                    let _ = thread_breaker.call(fail);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(breaker.state(), State::Open);
    assert_eq!(recorder.transitions(), vec![(State::Closed, State::Open)]);
    assert_eq!(
        recorder.count(EventKind::Success)
            + recorder.count(EventKind::Failure)
            + recorder.count(EventKind::RequestBlocked),
        THREAD_COUNT * (MIXED_CALLS + FAILING_CALLS)
    );
    assert!(recorder.count(EventKind::RequestBlocked) > 0);
}

#[test]
fn factory_breaker_exposes_counters_through_snapshot() {
    let factory = BreakerFactory::default().with_clock(Arc::new(ManualClock::new()));
    let count = factory
        .create("count", "users", &BreakerConfig::new().with("failureThreshold", 3))
        .unwrap();
    let window = factory.create("time", "orders", &BreakerConfig::new()).unwrap();

    let _ = count.call(fail);
    let _ = window.call(succeed);
    let _ = window.call(succeed);
    let _ = window.call(fail);
    let _ = window.call(succeed);

    assert_eq!(count.snapshot().failure_count(), Some(1));
    assert_eq!(window.snapshot().failure_rate(), Some(0.25));
    assert_eq!(window.snapshot().failure_count(), None);
}
