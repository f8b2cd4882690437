// Action Engine Core - typed, retryable, cancellable action execution
// NO process, UI or persistence code (executors are injected strategies)

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{ActionCanceller, ActionHandle, ActionsService};
pub use config::EngineConfig;
pub use domain::{ActionContext, ActionError, ActionFailure, ActionParams};
pub use error::{AppError, Result};
pub use port::{ActionExecutor, ActionStatus, RetryDecision};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
