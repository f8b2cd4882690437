//! Stall watcher - periodic scan of the in-flight set
//!
//! Actions never time out on their own. The watcher is the only thing that
//! surfaces actions hung in an external call and bookkeeping that nothing
//! will ever resume:
//! - past `stall_min_age` and not reported for `stall_report_interval`,
//!   a record with a live worker or timer is logged (warn past `stall_warn_age`);
//! - a record with neither is orphaned and force-untracked. Its handle is
//!   left unresolved.

use super::duration_ms;
use super::in_flight::InFlightSet;
use super::worker::ShutdownToken;
use crate::config::EngineConfig;
use crate::port::TimeProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Outcome of one scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StallReport {
    /// Long-running actions logged this pass
    pub reported: usize,
    /// Orphaned records removed this pass
    pub evicted: usize,
}

pub struct StallWatcher {
    in_flight: Arc<InFlightSet>,
    time_provider: Arc<dyn TimeProvider>,
    min_age_ms: i64,
    report_interval_ms: i64,
    warn_age_ms: i64,
}

impl StallWatcher {
    pub fn new(
        in_flight: Arc<InFlightSet>,
        time_provider: Arc<dyn TimeProvider>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            in_flight,
            time_provider,
            min_age_ms: config.stall_min_age_ms,
            report_interval_ms: config.stall_report_interval_ms,
            warn_age_ms: config.stall_warn_age_ms,
        }
    }

    /// Single pass over the in-flight set
    pub fn scan(&self) -> StallReport {
        let now = self.time_provider.now_millis();
        let mut report = StallReport::default();

        for record in self.in_flight.snapshot() {
            let age = record.since_created_ms(now);
            if age < self.min_age_ms || now < record.next_report_at() {
                continue;
            }

            if !record.has_live_work() {
                error!(
                    action_id = %record.id(),
                    action = %record.name(),
                    since_created_ms = age,
                    since_started_ms = record.since_started_ms(now),
                    "Action has neither a worker nor a retry timer, evicting orphaned record"
                );
                if self.in_flight.untrack(record.id()).is_some() {
                    report.evicted += 1;
                }
                continue;
            }

            if age > self.warn_age_ms {
                warn!(
                    action_id = %record.id(),
                    action = %record.name(),
                    since_created_ms = age,
                    since_started_ms = record.since_started_ms(now),
                    executing = record.is_executing(),
                    "Action still running"
                );
            } else {
                info!(
                    action_id = %record.id(),
                    action = %record.name(),
                    since_created_ms = age,
                    since_started_ms = record.since_started_ms(now),
                    executing = record.is_executing(),
                    "Action still running"
                );
            }
            record.set_next_report_at(now + self.report_interval_ms);
            report.reported += 1;
        }

        report
    }

    /// Scan every `period` until shutdown is signalled
    pub async fn run(self, period: Duration, mut shutdown: ShutdownToken) {
        info!(
            period_ms = duration_ms(period),
            min_age_ms = self.min_age_ms,
            "Stall watcher started"
        );
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if shutdown.is_shutdown() {
                break;
            }
            tokio::select! {
                _ = tick.tick() => {
                    self.scan();
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Stall watcher stopped");
    }
}
