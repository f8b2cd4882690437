// Worker - attempt / retry state machine
//
// SCHEDULED -> EXECUTING -> SUCCEEDED
//                        -> RETRY_SCHEDULED -> EXECUTING ...
//                        -> FAILED_TERMINAL
//
// The typed half of an action (context, executor, completion) moves from the
// worker task to the retry timer and back, so one action never has two
// attempts in flight.

pub mod constants;
mod panic_guard;
mod shutdown;

pub use panic_guard::{execute_guarded, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use super::handle::Completion;
use super::in_flight::ActionRecord;
use super::service::EngineShared;
use super::duration_ms;
use crate::domain::{
    effective_cause, ActionContext, ActionError, ActionFailure, ActionOutput, ActionParams,
};
use crate::port::{ActionExecutor, ActionStatus, RetryDecision};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one attempt, produced on the blocking worker
enum AttemptOutcome<R> {
    Succeeded(R),
    Failed {
        failure: ActionFailure,
        name: String,
        decision: RetryDecision,
    },
    /// The handle was resolved before the executor was called
    Skipped,
}

/// An action between attempts: everything needed to run the next one
pub(crate) struct RunningAction<P: ActionParams> {
    pub(crate) record: Arc<ActionRecord>,
    pub(crate) context: ActionContext<P>,
    pub(crate) executor: Arc<dyn ActionExecutor<Params = P>>,
    pub(crate) completion: Arc<Completion<ActionOutput<P>>>,
}

/// Executor name, never failing
pub(crate) fn describe<P: ActionParams>(
    executor: &Arc<dyn ActionExecutor<Params = P>>,
    context: &ActionContext<P>,
) -> String {
    match execute_guarded(AssertUnwindSafe(|| executor.name(context))) {
        PanicGuardResult::Success(name) => name,
        PanicGuardResult::Panicked(_) => P::type_name().to_string(),
    }
}

/// Queue one attempt on the worker pool
pub(crate) fn submit_attempt<P: ActionParams>(
    shared: &Arc<EngineShared>,
    action: RunningAction<P>,
) {
    let completion = Arc::clone(&action.completion);
    let task = shared.runtime.spawn(run_attempt(Arc::clone(shared), action));
    completion.attach_worker(task.abort_handle());
}

async fn run_attempt<P: ActionParams>(shared: Arc<EngineShared>, action: RunningAction<P>) {
    let RunningAction {
        record,
        context,
        executor,
        completion,
    } = action;

    let permit = match Arc::clone(&shared.workers).acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            finish_lost(&shared, &record, &completion, e.to_string());
            return;
        }
    };
    if completion.is_done() {
        // Cancelled while waiting for a worker
        return;
    }

    let started = shared.time_provider.now_millis();
    record.mark_started(started);
    debug!(
        action_id = %record.id(),
        action = %record.name(),
        retry_index = context.retry_index(),
        since_created_ms = record.since_created_ms(started),
        "Executing action"
    );

    let attempt_executor = Arc::clone(&executor);
    let attempt_record = Arc::clone(&record);
    let status = Arc::clone(&completion);
    let joined = tokio::task::spawn_blocking(move || {
        // The permit lives as long as the blocking call, even if the worker task is aborted
        let _permit = permit;
        let mut context = context;
        if status.is_done() {
            return (context, AttemptOutcome::Skipped);
        }
        let outcome = match execute_guarded(AssertUnwindSafe(|| attempt_executor.execute(&context)))
            .into_result("execute")
            .and_then(|result| result)
        {
            Ok(value) => AttemptOutcome::Succeeded(value),
            Err(e) => {
                evaluate_failure(&attempt_executor, &mut context, &*status, &attempt_record, e)
            }
        };
        (context, outcome)
    })
    .await;

    let now = shared.time_provider.now_millis();
    record.mark_stopped();

    let (context, outcome) = match joined {
        Ok(attempt) => attempt,
        Err(e) => {
            finish_lost(&shared, &record, &completion, e.to_string());
            return;
        }
    };

    let action = RunningAction {
        record,
        context,
        executor,
        completion,
    };
    match outcome {
        AttemptOutcome::Succeeded(value) => on_success(&shared, action, value, now - started),
        AttemptOutcome::Failed {
            failure,
            name,
            decision,
        } => on_failure(&shared, action, failure, &name, decision, now - started),
        AttemptOutcome::Skipped => debug!(
            action_id = %action.record.id(),
            action = %action.record.name(),
            "Action resolved before its attempt started"
        ),
    }
}

/// Record the failure and ask the executor what to do next.
/// Called on the blocking worker, right after the failed `execute`.
fn evaluate_failure<P: ActionParams>(
    executor: &Arc<dyn ActionExecutor<Params = P>>,
    context: &mut ActionContext<P>,
    status: &dyn ActionStatus,
    record: &ActionRecord,
    error: anyhow::Error,
) -> AttemptOutcome<ActionOutput<P>> {
    let failure = effective_cause(error);
    context.record_failure(failure.clone());
    let context: &ActionContext<P> = context;

    let name = describe(executor, context);
    record.set_name(name.clone());

    let decision = execute_guarded(AssertUnwindSafe(|| {
        executor.retry_after_error_delay(context, status)
    }))
    .into_result("retry_after_error_delay")
    .and_then(|result| result)
    .unwrap_or_else(|policy_error| {
        error!(
            action_id = %record.id(),
            action = %name,
            error = %policy_error,
            "Retry policy failed, not retrying"
        );
        RetryDecision::GiveUp
    });

    AttemptOutcome::Failed {
        failure,
        name,
        decision,
    }
}

fn on_success<P: ActionParams>(
    shared: &Arc<EngineShared>,
    action: RunningAction<P>,
    value: ActionOutput<P>,
    since_started_ms: i64,
) {
    let record = &action.record;
    let now = shared.time_provider.now_millis();
    shared.in_flight.untrack(record.id());
    if action.completion.complete(Ok(value)) {
        info!(
            action_id = %record.id(),
            action = %record.name(),
            retry_index = action.context.retry_index(),
            since_created_ms = record.since_created_ms(now),
            since_started_ms = since_started_ms,
            "Action succeeded"
        );
    } else {
        debug!(
            action_id = %record.id(),
            action = %record.name(),
            "Action finished after its handle was resolved, result dropped"
        );
    }
}

fn on_failure<P: ActionParams>(
    shared: &Arc<EngineShared>,
    action: RunningAction<P>,
    failure: ActionFailure,
    name: &str,
    decision: RetryDecision,
    since_started_ms: i64,
) {
    let record = Arc::clone(&action.record);
    let now = shared.time_provider.now_millis();
    let retry_index = action.context.retry_index();

    if action.completion.is_done() {
        debug!(
            action_id = %record.id(),
            action = %name,
            retry_index = retry_index,
            error = %failure,
            "Action already resolved, not retrying"
        );
        shared.in_flight.untrack(record.id());
        return;
    }

    match decision {
        RetryDecision::RetryAfter(delay) => {
            if failure.has_distinct_root_cause() {
                debug!(
                    action_id = %record.id(),
                    action = %name,
                    retry_index = retry_index,
                    delay_ms = duration_ms(delay),
                    since_created_ms = record.since_created_ms(now),
                    since_started_ms = since_started_ms,
                    error = %failure,
                    root_cause = %failure.root_cause(),
                    "Action failed, retrying"
                );
            } else {
                warn!(
                    action_id = %record.id(),
                    action = %name,
                    retry_index = retry_index,
                    delay_ms = duration_ms(delay),
                    since_created_ms = record.since_created_ms(now),
                    since_started_ms = since_started_ms,
                    error = %failure,
                    "Action failed, retrying"
                );
            }
            schedule_retry(shared, action, delay);
        }
        RetryDecision::GiveUp => {
            error!(
                action_id = %record.id(),
                action = %name,
                retry_index = retry_index,
                since_created_ms = record.since_created_ms(now),
                since_started_ms = since_started_ms,
                error = ?failure,
                "Action failed"
            );
            shared.in_flight.untrack(record.id());
            action.completion.complete(Err(ActionError::Failed(failure)));
        }
    }
}

/// Park the action on the retry timer; the record stays tracked
fn schedule_retry<P: ActionParams>(
    shared: &Arc<EngineShared>,
    action: RunningAction<P>,
    delay: Duration,
) {
    let completion = Arc::clone(&action.completion);
    let timer_shared = Arc::clone(shared);
    let timer = shared.runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        if action.completion.is_done() {
            return;
        }
        submit_attempt(&timer_shared, action);
    });
    completion.attach_timer(timer.abort_handle());
}

/// The blocking task or the worker pool went away under the action
fn finish_lost<R: Send + 'static>(
    shared: &Arc<EngineShared>,
    record: &ActionRecord,
    completion: &Completion<R>,
    reason: String,
) {
    error!(
        action_id = %record.id(),
        action = %record.name(),
        reason = %reason,
        "Action lost its worker"
    );
    shared.in_flight.untrack(record.id());
    completion.complete(Err(ActionError::WorkerLost(reason)));
}
