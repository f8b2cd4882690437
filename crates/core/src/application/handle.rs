//! Result handle - cancellable, eventually-completed outcome of a submission
//!
//! The completion side keeps references to whichever worker task or retry
//! timer is currently live, so cancelling reaches it. Every state change
//! happens under one lock: once the handle is done, any worker or timer
//! attached afterwards is aborted on the spot, so a retry can never be
//! scheduled behind a cancellation.

use super::in_flight::InFlightSet;
use super::lock;
use crate::domain::{ActionError, ActionId, CancelFlag};
use crate::port::ActionStatus;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::info;

pub(crate) trait Cancellable: ActionStatus {
    /// Cancel if not done yet; true when this call resolved the handle
    fn cancel(&self) -> bool;
}

struct CompletionState<R> {
    sender: Option<oneshot::Sender<Result<R, ActionError>>>,
    worker: Option<AbortHandle>,
    timer: Option<AbortHandle>,
}

/// Producer side of a result handle
pub(crate) struct Completion<R> {
    state: Mutex<CompletionState<R>>,
    cancel_flag: CancelFlag,
}

impl<R: Send + 'static> Completion<R> {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<Result<R, ActionError>>) {
        let (tx, rx) = oneshot::channel();
        let completion = Arc::new(Self {
            state: Mutex::new(CompletionState {
                sender: Some(tx),
                worker: None,
                timer: None,
            }),
            cancel_flag: CancelFlag::new(),
        });
        (completion, rx)
    }

    pub(crate) fn cancel_flag(&self) -> CancelFlag {
        self.cancel_flag.clone()
    }

    /// Resolve the handle; false if it was already resolved
    pub(crate) fn complete(&self, result: Result<R, ActionError>) -> bool {
        let mut state = lock(&self.state);
        let Some(sender) = state.sender.take() else {
            return false;
        };
        state.worker = None;
        state.timer = None;
        // Receiver gone means the caller dropped the handle; nothing to deliver
        let _ = sender.send(result);
        true
    }

    pub(crate) fn attach_worker(&self, worker: AbortHandle) -> bool {
        let mut state = lock(&self.state);
        if state.sender.is_none() {
            worker.abort();
            return false;
        }
        state.worker = Some(worker);
        true
    }

    pub(crate) fn attach_timer(&self, timer: AbortHandle) -> bool {
        let mut state = lock(&self.state);
        if state.sender.is_none() {
            timer.abort();
            return false;
        }
        state.timer = Some(timer);
        true
    }
}

impl<R: Send + 'static> ActionStatus for Completion<R> {
    fn is_done(&self) -> bool {
        lock(&self.state).sender.is_none()
    }

    fn has_live_work(&self) -> bool {
        let state = lock(&self.state);
        let live = |h: &Option<AbortHandle>| h.as_ref().is_some_and(|h| !h.is_finished());
        live(&state.worker) || live(&state.timer)
    }
}

impl<R: Send + 'static> Cancellable for Completion<R> {
    fn cancel(&self) -> bool {
        let mut state = lock(&self.state);
        let Some(sender) = state.sender.take() else {
            return false;
        };
        if let Some(worker) = state.worker.take() {
            worker.abort();
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        self.cancel_flag.raise();
        let _ = sender.send(Err(ActionError::Cancelled));
        true
    }
}

/// Cancel-only reference to a submitted action
///
/// Cheap to clone; useful once the handle itself has been moved into an
/// `.await`.
#[derive(Clone)]
pub struct ActionCanceller {
    id: ActionId,
    target: Arc<dyn Cancellable>,
    in_flight: Arc<InFlightSet>,
}

impl ActionCanceller {
    pub(crate) fn new(id: ActionId, target: Arc<dyn Cancellable>, in_flight: Arc<InFlightSet>) -> Self {
        Self {
            id,
            target,
            in_flight,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancel the action
    ///
    /// Aborts the live worker task and any pending retry timer, raises the
    /// context's cancel flag and resolves the handle with
    /// `ActionError::Cancelled`. An attempt already blocking inside the
    /// executor keeps running until it returns; its result is dropped.
    /// Returns false when the handle was already resolved.
    pub fn cancel(&self) -> bool {
        if !self.target.cancel() {
            return false;
        }
        if let Some(record) = self.in_flight.untrack(&self.id) {
            info!(
                action_id = %self.id,
                action = %record.name(),
                executing = record.is_executing(),
                "Action cancelled"
            );
        }
        true
    }

    pub fn is_done(&self) -> bool {
        self.target.is_done()
    }
}

/// Handle returned by `ActionsService::execute`
///
/// Resolves with the executor's value, or with `Failed`, `Cancelled` or
/// `WorkerLost`. Awaiting it consumes the handle; take a
/// [`ActionCanceller`] first to keep the ability to cancel.
pub struct ActionHandle<R> {
    canceller: ActionCanceller,
    receiver: oneshot::Receiver<Result<R, ActionError>>,
}

impl<R> ActionHandle<R> {
    pub(crate) fn new(canceller: ActionCanceller, receiver: oneshot::Receiver<Result<R, ActionError>>) -> Self {
        Self {
            canceller,
            receiver,
        }
    }

    pub fn id(&self) -> &str {
        self.canceller.id()
    }

    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    pub fn is_done(&self) -> bool {
        self.canceller.is_done()
    }

    pub fn canceller(&self) -> ActionCanceller {
        self.canceller.clone()
    }

    /// Block the current thread until the action resolves.
    ///
    /// Must not be called from inside an async context.
    pub fn blocking_wait(self) -> Result<R, ActionError> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(ActionError::Abandoned))
    }
}

impl<R> Future for ActionHandle<R> {
    type Output = Result<R, ActionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ActionError::Abandoned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle_for(
        completion: &Arc<Completion<u32>>,
        rx: oneshot::Receiver<Result<u32, ActionError>>,
    ) -> (ActionHandle<u32>, Arc<InFlightSet>) {
        let in_flight = Arc::new(InFlightSet::new(8));
        let target: Arc<dyn Cancellable> = completion.clone();
        let canceller = ActionCanceller::new("a-1".to_string(), target, Arc::clone(&in_flight));
        (ActionHandle::new(canceller, rx), in_flight)
    }

    #[tokio::test]
    async fn test_complete_delivers_value_once() {
        let (completion, rx) = Completion::new();
        let (handle, _) = handle_for(&completion, rx);

        assert!(completion.complete(Ok(7)));
        assert!(!completion.complete(Ok(8)));
        assert!(completion.is_done());
        assert_eq!(handle.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_aborts_timer_and_raises_flag() {
        let (completion, rx) = Completion::<u32>::new();
        let (handle, _) = handle_for(&completion, rx);
        let flag = completion.cancel_flag();

        let timer = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        assert!(completion.attach_timer(timer.abort_handle()));
        assert!(completion.has_live_work());

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(flag.is_raised());
        assert!(timer.await.unwrap_err().is_cancelled());
        assert!(matches!(handle.await, Err(ActionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_attach_after_done_aborts_immediately() {
        let (completion, _rx) = Completion::<u32>::new();
        completion.complete(Ok(1));

        let late = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        assert!(!completion.attach_timer(late.abort_handle()));
        assert!(late.await.unwrap_err().is_cancelled());
        assert!(!completion.has_live_work());
    }

    #[tokio::test]
    async fn test_finished_worker_is_not_live() {
        let (completion, _rx) = Completion::<u32>::new();
        let worker = tokio::spawn(async {});
        let abort = worker.abort_handle();
        worker.await.unwrap();

        completion.attach_worker(abort);
        assert!(!completion.has_live_work());
        assert!(!completion.is_done());
    }

    #[test]
    fn test_blocking_wait_reports_abandoned_when_producer_dropped() {
        let (completion, rx) = Completion::<u32>::new();
        drop(completion);

        let (other, _other_rx) = Completion::<u32>::new();
        let target: Arc<dyn Cancellable> = other;
        let canceller = ActionCanceller::new("a-2".to_string(), target, Arc::new(InFlightSet::new(1)));
        let handle = ActionHandle::new(canceller, rx);

        assert!(matches!(handle.blocking_wait(), Err(ActionError::Abandoned)));
    }
}
