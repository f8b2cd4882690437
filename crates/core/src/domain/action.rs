// Action Domain Model

use super::error::ActionFailure;
use std::any::type_name;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Action ID (opaque, unique per submission)
pub type ActionId = String;

/// Identity of an action request.
///
/// The concrete params type is the dispatch key used to find the executor;
/// `Output` is the result type the submission resolves with.
pub trait ActionParams: Send + 'static {
    type Output: Send + 'static;

    /// Human readable type name used in logs and configuration errors
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        type_name::<Self>()
    }
}

/// Result type declared by a params type
pub type ActionOutput<P> = <P as ActionParams>::Output;

/// Cooperative cancellation flag shared between a handle and its context
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mutable per-submission state, threaded through every attempt.
///
/// `retry_index` starts at -1 and is incremented exactly once per failed
/// attempt, before the retry policy is consulted.
#[derive(Debug)]
pub struct ActionContext<P> {
    params: P,
    last_error: Option<ActionFailure>,
    retry_index: i32,
    cancel: CancelFlag,
}

impl<P> ActionContext<P> {
    pub fn new(params: P) -> Self {
        Self::with_cancel_flag(params, CancelFlag::new())
    }

    pub(crate) fn with_cancel_flag(params: P, cancel: CancelFlag) -> Self {
        Self {
            params,
            last_error: None,
            retry_index: -1,
            cancel,
        }
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    /// Error of the most recent failed attempt
    pub fn last_error(&self) -> Option<&ActionFailure> {
        self.last_error.as_ref()
    }

    /// -1 before the first failure, then 0, 1, 2, ...
    pub fn retry_index(&self) -> i32 {
        self.retry_index
    }

    /// Number of attempts started so far, counting the current one
    pub fn attempt(&self) -> u32 {
        u32::try_from(self.retry_index + 2).unwrap_or(1)
    }

    /// True once the handle was cancelled; long-running executors should poll it
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_raised()
    }

    /// Record a failed attempt
    pub(crate) fn record_failure(&mut self, failure: ActionFailure) {
        self.last_error = Some(failure);
        self.retry_index += 1;
    }
}
