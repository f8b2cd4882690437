//! Shared fixtures for the integration tests

use action_engine_core::{ActionsService, EngineConfig};
use std::future::Future;
use std::time::{Duration, Instant};

/// Service on the current runtime with the given worker pool size
pub fn service_with_workers(worker_pool_size: usize) -> ActionsService {
    let config = EngineConfig {
        worker_pool_size,
        ..Default::default()
    };
    ActionsService::new(config).expect("valid test config")
}

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Await with a generous upper bound so a hang fails the test instead of blocking it
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("future did not complete within 10s")
}
