// Worker constants (No magic values)

/// Attempts running concurrently across all actions.
/// Small on purpose: a desktop process should surface leaks, not absorb them.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 20;

/// Tracked, unresolved actions before submission is refused as a leak
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1000;

/// Stall watcher tick (5s)
pub const DEFAULT_WATCH_INTERVAL_MS: u64 = 5_000;

/// Actions younger than this are never reported as stalled (2 minutes)
pub const DEFAULT_STALL_MIN_AGE_MS: i64 = 120_000;

/// Gap between two stall reports of the same action (1 minute)
pub const DEFAULT_STALL_REPORT_INTERVAL_MS: i64 = 60_000;

/// Stall reports turn into warnings past this age (5 minutes)
pub const DEFAULT_STALL_WARN_AGE_MS: i64 = 5 * 60 * 1000;

/// Sentinel for `execution_started_at` while no attempt is running
pub const NOT_RUNNING: i64 = -1;
