// Application Layer - Actions service and its moving parts

pub mod handle;
pub mod in_flight;
pub mod registry;
pub mod retry;
pub mod service;
pub mod watcher;
pub mod worker;

// Re-exports
pub use handle::{ActionCanceller, ActionHandle};
pub use in_flight::{ActionRecord, InFlightSet};
pub use registry::ExecutorRegistry;
pub use retry::BackoffPolicy;
pub use service::ActionsService;
pub use watcher::{StallReport, StallWatcher};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken};

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
/// Guarded sections never leave state half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whole milliseconds of a duration, saturating
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
