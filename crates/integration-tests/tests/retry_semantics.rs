//! Attempt / retry state machine, observed through the public API

use action_engine_core::port::action_executor::mocks::{MockBehavior, MockExecutor, MockParams};
use action_engine_core::{
    ActionContext, ActionError, ActionExecutor, ActionParams, ActionStatus, RetryDecision,
};
use action_engine_integration_tests::{service_with_workers, wait_until, within};
use anyhow::bail;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

/// A "no retry" policy -> exactly one attempt, exceptional completion
#[tokio::test]
async fn test_no_retry_policy_fails_after_one_attempt() {
    let service = service_with_workers(4);
    let executor = MockExecutor::new_fail("daemon unavailable");
    let calls = executor.call_counter();
    service.register(executor);

    let result = within(service.execute(MockParams::new("start")).unwrap()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, ActionError::Failed(_)), "unexpected error: {err}");
    assert!(err.to_string().contains("daemon unavailable"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.in_flight_count(), 0);
}

/// Delays for retry index 0, 1, 2 and give-up at 3 -> four attempts,
/// failing with the last attempt's error
#[tokio::test]
async fn test_retry_budget_produces_four_attempts() {
    let service = service_with_workers(4);
    let executor = MockExecutor::new_fail("pull failed")
        .with_retry_delays(vec![Duration::from_millis(1); 3]);
    let calls = executor.call_counter();
    service.register(executor);

    let err = within(service.execute(MockParams::new("image")).unwrap())
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let failure = err.failure().expect("failed with an executor error");
    // The fourth attempt runs with retry index 2 (three failures recorded)
    assert_eq!(failure.to_string(), "pull failed (retry index 2)");
    assert_eq!(service.in_flight_count(), 0);
}

/// Success on attempt N -> exactly N attempts and nothing afterwards
#[tokio::test]
async fn test_success_on_third_attempt_stops_retrying() {
    let service = service_with_workers(4);
    let executor = MockExecutor::new(MockBehavior::SucceedAtRetryIndex(2))
        .with_retry_delays(vec![Duration::from_millis(1); 10]);
    let calls = executor.call_counter();
    service.register(executor);

    let value = within(service.execute(MockParams::new("sync")).unwrap())
        .await
        .unwrap();
    assert_eq!(value, "sync");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(service.in_flight_count(), 0);
}

/// Attempts of one action never overlap, even with idle workers
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_attempts_of_one_action_are_sequential() {
    let service = service_with_workers(20);
    let executor = MockExecutor::new_fail("flaky")
        .with_retry_delays(vec![Duration::ZERO; 5])
        .with_attempt_duration(Duration::from_millis(20));
    let calls = executor.call_counter();
    let max_running = executor.max_running_counter();
    service.register(executor);

    let result = within(service.execute(MockParams::new("serial")).unwrap()).await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
}

/// Cancelling between two retries prevents any further attempt
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_between_retries_stops_the_action() {
    let service = service_with_workers(4);
    let executor = MockExecutor::new_fail("network down")
        .with_retry_delays(vec![Duration::from_millis(300); 5]);
    let calls = executor.call_counter();
    service.register(executor);

    let handle = service.execute(MockParams::new("fetch")).unwrap();
    assert!(wait_until(Duration::from_secs(5), || calls.load(Ordering::SeqCst) == 1).await);
    // Give the failure path time to park the action on the retry timer
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(handle.cancel());
    assert!(handle.is_done());
    assert_eq!(service.in_flight_count(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(within(handle).await, Err(ActionError::Cancelled)));
}

/// A failing attempt whose policy asks for a retry still stops once its
/// handle was cancelled during the attempt
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_attempt_wins_over_retry_policy() {
    let service = service_with_workers(4);
    let executor = MockExecutor::new_fail("registry timeout")
        .with_retry_delays(vec![Duration::from_millis(1); 5])
        .with_attempt_duration(Duration::from_millis(200));
    let calls = executor.call_counter();
    service.register(executor);

    let handle = service.execute(MockParams::new("push")).unwrap();
    assert!(wait_until(Duration::from_secs(5), || calls.load(Ordering::SeqCst) == 1).await);

    assert!(handle.cancel());
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.in_flight_count(), 0);
    assert!(matches!(within(handle).await, Err(ActionError::Cancelled)));
}

struct Reindex;

impl ActionParams for Reindex {
    type Output = ();
}

/// Fails every attempt; its retry policy blocks before giving up
struct SlowPolicyExecutor;

impl ActionExecutor for SlowPolicyExecutor {
    type Params = Reindex;

    fn execute(&self, _context: &ActionContext<Reindex>) -> anyhow::Result<()> {
        bail!("index locked")
    }

    fn name(&self, _context: &ActionContext<Reindex>) -> String {
        "sync".to_string()
    }

    fn retry_after_error_delay(
        &self,
        _context: &ActionContext<Reindex>,
        _status: &dyn ActionStatus,
    ) -> anyhow::Result<RetryDecision> {
        thread::sleep(Duration::from_millis(400));
        Ok(RetryDecision::GiveUp)
    }
}

/// The retry policy runs on the blocking pool, so timers keep firing on a
/// single-threaded runtime while it blocks
#[tokio::test]
async fn test_blocking_retry_policy_does_not_stall_timers() {
    let service = service_with_workers(4);
    service.register(SlowPolicyExecutor);

    let handle = service.execute(Reindex).unwrap();
    let started = Instant::now();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(started.elapsed() < Duration::from_millis(300), "{:?}", started.elapsed());

    let err = within(handle).await.unwrap_err();
    assert_eq!(err.failure().unwrap().to_string(), "index locked");
    assert_eq!(service.in_flight_count(), 0);
}

#[tokio::test]
async fn test_different_actions_run_in_parallel() {
    let service = service_with_workers(4);
    let executor = MockExecutor::new_success().with_attempt_duration(Duration::from_millis(100));
    let max_running = executor.max_running_counter();
    service.register(executor);

    let handles: Vec<_> = (0..4)
        .map(|i| service.execute(MockParams::new(format!("container-{i}"))).unwrap())
        .collect();
    let results = within(futures::future::join_all(handles)).await;

    assert!(results.iter().all(Result::is_ok));
    assert!(max_running.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrency() {
    let service = service_with_workers(2);
    let executor = MockExecutor::new_success().with_attempt_duration(Duration::from_millis(30));
    let max_running = executor.max_running_counter();
    service.register(executor);

    let handles: Vec<_> = (0..8)
        .map(|i| service.execute(MockParams::new(format!("job-{i}"))).unwrap())
        .collect();
    within(futures::future::join_all(handles)).await;

    assert!(max_running.load(Ordering::SeqCst) <= 2);
}
