// Domain Layer - Action contracts and errors

pub mod action;
pub mod error;

// Re-exports
pub use action::{ActionContext, ActionId, ActionOutput, ActionParams, CancelFlag};
pub use error::{effective_cause, ActionError, ActionFailure};
