// Domain Error Types

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Effective cause of a failed attempt
///
/// Wraps the executor's error so it can be stored in the context, passed to
/// the retry policy and delivered through the handle at the same time.
#[derive(Clone)]
pub struct ActionFailure(Arc<anyhow::Error>);

impl ActionFailure {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    /// Innermost error of the chain
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        self.0.root_cause()
    }

    /// True when the raised error wraps another error
    pub fn has_distinct_root_cause(&self) -> bool {
        self.0.chain().nth(1).is_some()
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl std::error::Error for ActionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<anyhow::Error> for ActionFailure {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

#[derive(Error, Debug, Clone)]
pub enum ActionError {
    /// No executor registered for the submitted params type
    #[error("No executor registered for params type {params_type}")]
    NotRegistered { params_type: &'static str },

    /// In-flight set is full, most likely because handles are leaking
    #[error("Too many actions in flight (limit {limit}), probable leak")]
    TooManyInFlight { limit: usize },

    #[error("Actions service has been disposed")]
    Disposed,

    #[error("Action failed: {0}")]
    Failed(#[source] ActionFailure),

    #[error("Action cancelled")]
    Cancelled,

    #[error("Worker lost: {0}")]
    WorkerLost(String),

    #[error("Action abandoned without a result")]
    Abandoned,
}

impl ActionError {
    /// Configuration errors are raised synchronously by `execute` and never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ActionError::NotRegistered { .. }
                | ActionError::TooManyInFlight { .. }
                | ActionError::Disposed
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActionError::Cancelled)
    }

    pub fn failure(&self) -> Option<&ActionFailure> {
        match self {
            ActionError::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Unwrap a raised error to its effective cause.
///
/// Executors that await nested actions propagate `ActionError::Failed`; the
/// inner failure is what the retry policy and the logs care about.
pub fn effective_cause(error: anyhow::Error) -> ActionFailure {
    let mut failure = ActionFailure::new(error);
    while let Some(ActionError::Failed(inner)) = failure.downcast_ref::<ActionError>() {
        let inner = inner.clone();
        failure = inner;
    }
    failure
}

pub type Result<T> = std::result::Result<T, ActionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_effective_cause_passes_plain_errors_through() {
        let failure = effective_cause(anyhow!("disk full"));
        assert_eq!(failure.to_string(), "disk full");
        assert!(!failure.has_distinct_root_cause());
    }

    #[test]
    fn test_effective_cause_unwraps_nested_action_failures() {
        let inner = ActionFailure::new(anyhow!("daemon not reachable"));
        let once = ActionError::Failed(inner);
        let nested = ActionError::Failed(ActionFailure::new(anyhow::Error::new(once)));

        let failure = effective_cause(anyhow::Error::new(nested));
        assert_eq!(failure.to_string(), "daemon not reachable");
    }

    #[test]
    fn test_root_cause_detection() {
        let failure = ActionFailure::new(anyhow!("connection refused").context("pull image"));
        assert!(failure.has_distinct_root_cause());
        assert_eq!(failure.root_cause().to_string(), "connection refused");
    }

    #[test]
    fn test_configuration_errors() {
        assert!(ActionError::NotRegistered { params_type: "Ping" }.is_configuration());
        assert!(ActionError::TooManyInFlight { limit: 3 }.is_configuration());
        assert!(ActionError::Disposed.is_configuration());
        assert!(!ActionError::Cancelled.is_configuration());
        assert!(ActionError::Cancelled.is_cancelled());
        assert!(!ActionError::Disposed.is_cancelled());
    }
}
