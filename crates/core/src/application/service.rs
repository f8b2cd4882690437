//! Actions service - registry, submission and lifecycle
//!
//! Every mutating operation of the application is submitted here. The
//! service resolves the executor by params type, tracks the action, and runs
//! its attempts on a bounded worker pool. Retry timing is owned by the
//! executor; the service only carries it out.
//!
//! Three independently scheduled groups do the work:
//! - worker pool: `worker_pool_size` semaphore permits in front of
//!   `spawn_blocking`;
//! - retry timer: tasks sleeping on the runtime's time driver;
//! - stall watcher: one task, started by the first submission and stopped
//!   by [`ActionsService::dispose`].

use super::handle::{ActionCanceller, ActionHandle, Cancellable, Completion};
use super::in_flight::{ActionRecord, InFlightSet};
use super::lock;
use super::registry::ExecutorRegistry;
use super::watcher::StallWatcher;
use super::worker::{describe, shutdown_channel, submit_attempt, RunningAction, ShutdownSender};
use crate::config::EngineConfig;
use crate::domain::{ActionContext, ActionError, ActionOutput, ActionParams};
use crate::error::{AppError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{ActionExecutor, IdProvider, TimeProvider};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// State shared by the service, its worker tasks and retry timers
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) registry: ExecutorRegistry,
    pub(crate) in_flight: Arc<InFlightSet>,
    pub(crate) workers: Arc<Semaphore>,
    pub(crate) time_provider: Arc<dyn TimeProvider>,
    pub(crate) id_provider: Arc<dyn IdProvider>,
    pub(crate) runtime: Handle,
}

enum WatcherState {
    NotStarted,
    Running {
        stop: ShutdownSender,
        task: JoinHandle<()>,
    },
    Stopped,
}

pub struct ActionsService {
    shared: Arc<EngineShared>,
    watcher: Mutex<WatcherState>,
}

impl ActionsService {
    /// Create a service bound to the current tokio runtime
    pub fn new(config: EngineConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            AppError::Config("ActionsService must be created inside a tokio runtime".to_string())
        })?;
        Self::with_runtime(config, runtime)
    }

    /// Create a service spawning onto the given runtime
    ///
    /// Submissions may then come from any thread, inside the runtime or not.
    pub fn with_runtime(config: EngineConfig, runtime: Handle) -> Result<Self> {
        Self::with_providers(
            config,
            runtime,
            Arc::new(SystemTimeProvider),
            Arc::new(UuidProvider),
        )
    }

    /// Create a service with injected clock and id source (for deterministic testing)
    pub fn with_providers(
        config: EngineConfig,
        runtime: Handle,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            worker_pool_size = config.worker_pool_size,
            max_in_flight = config.max_in_flight,
            "Actions service created"
        );
        let shared = EngineShared {
            in_flight: Arc::new(InFlightSet::new(config.max_in_flight)),
            workers: Arc::new(Semaphore::new(config.worker_pool_size)),
            registry: ExecutorRegistry::new(),
            config,
            time_provider,
            id_provider,
            runtime,
        };
        Ok(Self {
            shared: Arc::new(shared),
            watcher: Mutex::new(WatcherState::NotStarted),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Bind an executor to its params type. Last registration wins.
    pub fn register<E: ActionExecutor>(&self, executor: E) -> bool {
        self.shared.registry.register(executor)
    }

    /// Register an executor that is also used elsewhere
    pub fn register_shared<E: ActionExecutor>(&self, executor: Arc<E>) -> bool {
        self.shared.registry.register_shared(executor)
    }

    pub fn is_registered<P: ActionParams>(&self) -> bool {
        self.shared.registry.contains::<P>()
    }

    /// Submit an action
    ///
    /// Never blocks: the first attempt is queued on the worker pool and the
    /// handle returned at once. Configuration problems are returned here and
    /// never through the handle:
    /// - `NotRegistered` when no executor is bound to `P`;
    /// - `TooManyInFlight` when the in-flight cap is reached;
    /// - `Disposed` after [`dispose`](Self::dispose).
    pub fn execute<P: ActionParams>(
        &self,
        params: P,
    ) -> std::result::Result<ActionHandle<ActionOutput<P>>, ActionError> {
        let executor = self.shared.registry.resolve::<P>().map_err(|e| {
            error!(error = %e, "Submitted action has no executor");
            e
        })?;
        self.ensure_watcher_started()?;

        let (completion, receiver) = Completion::<ActionOutput<P>>::new();
        let context = ActionContext::with_cancel_flag(params, completion.cancel_flag());
        let name = describe(&executor, &context);
        let id = self.shared.id_provider.generate_id();
        let now = self.shared.time_provider.now_millis();

        let target: Arc<dyn Cancellable> = completion.clone();
        let record = Arc::new(ActionRecord::new(id.clone(), name, now, Arc::clone(&target)));
        self.shared.in_flight.track(Arc::clone(&record))?;

        debug!(
            action_id = %id,
            action = %record.name(),
            in_flight = self.shared.in_flight.len(),
            "Action scheduled"
        );

        let canceller = ActionCanceller::new(id, target, Arc::clone(&self.shared.in_flight));
        submit_attempt(
            &self.shared,
            RunningAction {
                record,
                context,
                executor,
                completion,
            },
        );
        Ok(ActionHandle::new(canceller, receiver))
    }

    /// Tracked actions that have not reached a terminal state
    pub fn in_flight_count(&self) -> usize {
        self.shared.in_flight.len()
    }

    pub fn is_watcher_running(&self) -> bool {
        matches!(*lock(&self.watcher), WatcherState::Running { .. })
    }

    /// Watcher over this service's in-flight set, for on-demand scans
    pub fn stall_watcher(&self) -> StallWatcher {
        StallWatcher::new(
            Arc::clone(&self.shared.in_flight),
            Arc::clone(&self.shared.time_provider),
            &self.shared.config,
        )
    }

    /// Cancel every tracked action; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for record in self.shared.in_flight.snapshot() {
            if record.cancel() {
                cancelled += 1;
            }
            self.shared.in_flight.untrack(record.id());
        }
        if cancelled > 0 {
            info!(cancelled = cancelled, "Cancelled all in-flight actions");
        }
        cancelled
    }

    /// Stop the stall watcher. Idempotent.
    ///
    /// In-flight actions keep running and their handles stay pending; call
    /// [`cancel_all`](Self::cancel_all) first to resolve them. Later
    /// submissions fail with `ActionError::Disposed`.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *lock(&self.watcher), WatcherState::Stopped);
        match previous {
            WatcherState::Running { stop, task } => {
                stop.shutdown();
                task.abort();
                info!(
                    in_flight = self.shared.in_flight.len(),
                    "Actions service disposed, stall watcher stopped"
                );
            }
            WatcherState::NotStarted => {
                info!("Actions service disposed before any submission");
            }
            WatcherState::Stopped => {}
        }
    }

    /// Start the watcher on first submission, exactly once
    fn ensure_watcher_started(&self) -> std::result::Result<(), ActionError> {
        let mut state = lock(&self.watcher);
        match *state {
            WatcherState::Running { .. } => Ok(()),
            WatcherState::Stopped => Err(ActionError::Disposed),
            WatcherState::NotStarted => {
                let (stop, token) = shutdown_channel();
                let watcher = self.stall_watcher();
                let period = self.shared.config.watch_interval();
                let task = self.shared.runtime.spawn(watcher.run(period, token));
                *state = WatcherState::Running { stop, task };
                Ok(())
            }
        }
    }
}

impl Drop for ActionsService {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::action_executor::mocks::{MockExecutor, MockParams};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn service() -> ActionsService {
        ActionsService::with_providers(
            EngineConfig::default(),
            Handle::current(),
            Arc::new(SystemTimeProvider),
            Arc::new(SequentialIdProvider::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_requires_valid_config() {
        let config = EngineConfig {
            worker_pool_size: 0,
            ..Default::default()
        };
        assert!(matches!(ActionsService::new(config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_new_outside_runtime_is_a_config_error() {
        let err = ActionsService::new(EngineConfig::default()).err().unwrap();
        assert!(err.to_string().contains("tokio runtime"));
    }

    #[tokio::test]
    async fn test_watcher_starts_on_first_submission_only() {
        let service = service();
        service.register(MockExecutor::new_success());
        assert!(!service.is_watcher_running());

        let handle = assert_ok!(service.execute(MockParams::new("one")));
        assert_eq!(handle.id(), "action-1");
        assert!(service.is_watcher_running());
        assert_eq!(assert_ok!(handle.await), "one");
    }

    #[tokio::test]
    async fn test_execute_after_dispose_is_rejected() {
        let service = service();
        service.register(MockExecutor::new_success());
        assert_ok!(assert_ok!(service.execute(MockParams::new("before"))).await);

        service.dispose();
        service.dispose();
        assert!(!service.is_watcher_running());
        let err = assert_err!(service.execute(MockParams::new("after")).map(|_| ()));
        assert!(matches!(err, ActionError::Disposed));
    }

    #[tokio::test]
    async fn test_cancel_all_resolves_pending_handles() {
        let service = service();
        service.register(
            MockExecutor::new_fail("unreachable").with_retry_delays(vec![Duration::from_secs(60)]),
        );

        let handle = assert_ok!(service.execute(MockParams::new("stuck")));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(service.cancel_all(), 1);
        assert_eq!(service.in_flight_count(), 0);
        assert!(matches!(handle.await, Err(ActionError::Cancelled)));
    }
}
