// In-flight set - bookkeeping for every unresolved action

use super::handle::Cancellable;
use super::lock;
use super::worker::constants::NOT_RUNNING;
use crate::domain::{ActionError, ActionId};
use crate::port::ActionStatus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::error;

/// Tracked action, from submission until it reaches a terminal state
///
/// Holds only the type-erased part of an action; the typed context travels
/// with the attempt that currently owns it.
pub struct ActionRecord {
    id: ActionId,
    name: Mutex<String>,
    created_at: i64,
    execution_started_at: AtomicI64,
    next_report_at: AtomicI64,
    handle: Arc<dyn Cancellable>,
}

impl ActionRecord {
    pub(crate) fn new(
        id: ActionId,
        name: String,
        created_at: i64,
        handle: Arc<dyn Cancellable>,
    ) -> Self {
        Self {
            id,
            name: Mutex::new(name),
            created_at,
            execution_started_at: AtomicI64::new(NOT_RUNNING),
            next_report_at: AtomicI64::new(created_at),
            handle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> String {
        lock(&self.name).clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *lock(&self.name) = name;
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Start of the running attempt, `None` while queued or waiting on a timer
    pub fn execution_started_at(&self) -> Option<i64> {
        match self.execution_started_at.load(Ordering::SeqCst) {
            NOT_RUNNING => None,
            started => Some(started),
        }
    }

    pub fn is_executing(&self) -> bool {
        self.execution_started_at().is_some()
    }

    pub(crate) fn mark_started(&self, now: i64) {
        self.execution_started_at.store(now, Ordering::SeqCst);
    }

    pub(crate) fn mark_stopped(&self) {
        self.execution_started_at.store(NOT_RUNNING, Ordering::SeqCst);
    }

    pub fn since_created_ms(&self, now: i64) -> i64 {
        now - self.created_at
    }

    /// -1 when no attempt is running
    pub fn since_started_ms(&self, now: i64) -> i64 {
        self.execution_started_at().map_or(NOT_RUNNING, |started| now - started)
    }

    pub(crate) fn next_report_at(&self) -> i64 {
        self.next_report_at.load(Ordering::SeqCst)
    }

    pub(crate) fn set_next_report_at(&self, at: i64) {
        self.next_report_at.store(at, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    /// A worker task or retry timer is still attached to the handle
    pub fn has_live_work(&self) -> bool {
        self.handle.has_live_work()
    }

    pub(crate) fn cancel(&self) -> bool {
        self.handle.cancel()
    }
}

/// Concurrent set of tracked actions, hard-capped to catch leaks
///
/// Mutated only by whole-record add/remove; a record is removed at most once.
pub struct InFlightSet {
    records: Mutex<HashMap<ActionId, Arc<ActionRecord>>>,
    capacity: usize,
}

impl InFlightSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Track a new record; refuses once the cap is reached
    pub fn track(&self, record: Arc<ActionRecord>) -> Result<(), ActionError> {
        let mut records = lock(&self.records);
        if records.len() >= self.capacity {
            error!(
                in_flight = records.len(),
                limit = self.capacity,
                action = %record.name(),
                "Too many actions in flight, handles are probably leaking"
            );
            return Err(ActionError::TooManyInFlight {
                limit: self.capacity,
            });
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    /// Remove a record; `None` if it was already removed
    pub fn untrack(&self, id: &str) -> Option<Arc<ActionRecord>> {
        lock(&self.records).remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.records).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current records, so callers never hold the lock
    pub fn snapshot(&self) -> Vec<Arc<ActionRecord>> {
        lock(&self.records).values().cloned().collect()
    }
}
