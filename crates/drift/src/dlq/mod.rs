//! Dead-letter handling.
//!
//! Tasks that exhausted their retries, or could never succeed, are deposited
//! on the dead-letter queue with their error for later inspection. Malformed
//! source lines are only counted.

mod queue;
mod tracker;
mod types;

pub use queue::DeadLetterQueue;
pub use tracker::FailureTracker;
pub use types::FailureStats;
