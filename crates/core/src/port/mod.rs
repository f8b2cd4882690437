// Port Layer - Interfaces for pluggable strategies and environment

pub mod action_executor;
pub mod id_provider; // For deterministic testing
pub mod time_provider;

// Re-exports
pub use action_executor::{ActionExecutor, ActionStatus, RetryDecision};
pub use id_provider::IdProvider;
pub use time_provider::TimeProvider;
