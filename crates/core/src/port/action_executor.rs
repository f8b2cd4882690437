// Action Executor Port
// Pluggable strategy: what an action does and how it is retried

use crate::domain::{ActionContext, ActionOutput, ActionParams};
use std::time::Duration;

/// Decision returned by an executor after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run another attempt after the given delay
    RetryAfter(Duration),
    /// Fail the action with the last error
    GiveUp,
}

impl RetryDecision {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            RetryDecision::RetryAfter(delay) => Some(*delay),
            RetryDecision::GiveUp => None,
        }
    }
}

/// Read-only view of a result handle, as seen by retry policies and the stall watcher
pub trait ActionStatus: Send + Sync {
    /// Handle already resolved (succeeded, failed or cancelled)
    fn is_done(&self) -> bool;

    /// A worker task or retry timer is still attached and has not finished
    fn has_live_work(&self) -> bool;
}

/// Action Executor trait
///
/// One implementation per params type, registered once with the actions
/// service. `execute` runs on a blocking worker thread and is expected to
/// block for the real work.
pub trait ActionExecutor: Send + Sync + 'static {
    type Params: ActionParams;

    /// Run one attempt
    ///
    /// May read `retry_index` and `last_error` to adapt behaviour across
    /// attempts (e.g. shorter timeouts later).
    fn execute(
        &self,
        context: &ActionContext<Self::Params>,
    ) -> anyhow::Result<ActionOutput<Self::Params>>;

    /// Human readable name used for ids and logs. Must not fail.
    fn name(&self, context: &ActionContext<Self::Params>) -> String;

    /// Delay before the next attempt, called once per failed attempt.
    ///
    /// An error is treated as `GiveUp`. When `status.is_done()` the action
    /// is terminal whatever this returns.
    fn retry_after_error_delay(
        &self,
        _context: &ActionContext<Self::Params>,
        _status: &dyn ActionStatus,
    ) -> anyhow::Result<RetryDecision> {
        Ok(RetryDecision::GiveUp)
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Params handled by [`MockExecutor`]
    #[derive(Debug, Clone)]
    pub struct MockParams {
        pub label: String,
    }

    impl MockParams {
        pub fn new(label: impl Into<String>) -> Self {
            Self {
                label: label.into(),
            }
        }
    }

    impl ActionParams for MockParams {
        type Output = String;
    }

    /// Mock executor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed with the label
        Success,
        /// Always fail with message
        Fail(String),
        /// Fail while retry_index is below the threshold, then succeed
        SucceedAtRetryIndex(i32),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    /// Mock Action Executor for testing
    ///
    /// Retry delays are looked up by retry index; past the end of the list
    /// the executor gives up.
    pub struct MockExecutor {
        behavior: MockBehavior,
        retry_delays: Vec<Duration>,
        attempt_duration: Duration,
        call_count: Arc<AtomicUsize>,
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
    }

    impl MockExecutor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                retry_delays: Vec::new(),
                attempt_duration: Duration::ZERO,
                call_count: Arc::new(AtomicUsize::new(0)),
                running: Arc::new(AtomicUsize::new(0)),
                max_running: Arc::new(AtomicUsize::new(0)),
            }
        }
        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }
        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }
        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }
        pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
            self.retry_delays = delays;
            self
        }
        /// Block each attempt for the given duration
        pub fn with_attempt_duration(mut self, duration: Duration) -> Self {
            self.attempt_duration = duration;
            self
        }
        /// Shared attempt counter, readable after the executor is registered
        pub fn call_counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.call_count)
        }
        /// Highest number of attempts observed running at the same time
        pub fn max_running_counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.max_running)
        }
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    impl ActionExecutor for MockExecutor {
        type Params = MockParams;

        fn execute(&self, context: &ActionContext<MockParams>) -> anyhow::Result<String> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);

            if !self.attempt_duration.is_zero() {
                thread::sleep(self.attempt_duration);
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            match &self.behavior {
                MockBehavior::Success => Ok(context.params().label.clone()),
                MockBehavior::Fail(msg) => bail!("{} (retry index {})", msg, context.retry_index()),
                MockBehavior::SucceedAtRetryIndex(threshold) => {
                    if context.retry_index() < *threshold {
                        bail!("not yet (retry index {})", context.retry_index());
                    }
                    Ok(context.params().label.clone())
                }
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
            }
        }

        fn name(&self, context: &ActionContext<MockParams>) -> String {
            format!("mock:{}", context.params().label)
        }

        fn retry_after_error_delay(
            &self,
            context: &ActionContext<MockParams>,
            _status: &dyn ActionStatus,
        ) -> anyhow::Result<RetryDecision> {
            let decision = usize::try_from(context.retry_index())
                .ok()
                .and_then(|index| self.retry_delays.get(index))
                .map_or(RetryDecision::GiveUp, |delay| RetryDecision::RetryAfter(*delay));
            Ok(decision)
        }
    }
}
