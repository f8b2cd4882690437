// Panic isolation for worker safety
use std::panic::{catch_unwind, UnwindSafe};
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed
    Success(T),
    /// Execution panicked
    Panicked(String),
}

impl<T> PanicGuardResult<T> {
    /// Fold a panic into an ordinary error
    pub fn into_result(self, what: &str) -> anyhow::Result<T> {
        match self {
            PanicGuardResult::Success(value) => Ok(value),
            PanicGuardResult::Panicked(msg) => Err(anyhow::anyhow!("{what} panicked: {msg}")),
        }
    }
}

/// Execute a closure with panic isolation
///
/// If the closure panics, the panic is caught and returned as PanicGuardResult::Panicked.
/// Executors are third-party strategies; one of them panicking must not take
/// down a worker thread or leave a handle unresolved.
pub fn execute_guarded<F, T>(f: F) -> PanicGuardResult<T>
where
    F: FnOnce() -> T + UnwindSafe,
{
    match catch_unwind(f) {
        Ok(result) => PanicGuardResult::Success(result),
        Err(panic_info) => {
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            error!(panic_msg = %panic_msg, "Executor code panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}
