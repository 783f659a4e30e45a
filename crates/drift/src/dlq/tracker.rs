//! Malformed-line accounting with a failure ceiling.

use tracing::error;

use drift_core::emit;
use drift_core::metrics::events::{EntitiesSkipped, FailureStage, SkipReason};

use super::FailureStats;
use crate::error::MappingError;

/// Counts failures during a mapping job and stops it at `max_failures`.
pub struct FailureTracker {
    stats: FailureStats,
    max_failures: usize,
    target: String,
    last_error: Option<String>,
}

impl FailureTracker {
    /// `max_failures` of 0 means unlimited.
    pub fn new(max_failures: usize, target: String) -> Self {
        Self {
            stats: FailureStats::default(),
            max_failures,
            target,
            last_error: None,
        }
    }

    /// Record a skipped line. Fails once the ceiling is reached.
    pub fn record_failure(&mut self, error: &MappingError) -> Result<(), MappingError> {
        self.stats.increment(FailureStage::Map);
        self.last_error = Some(error.to_string());
        emit!(EntitiesSkipped {
            count: 1,
            reason: SkipReason::Malformed,
            target: self.target.clone(),
        });

        let count = self.count();
        if self.max_failures > 0 && count >= self.max_failures {
            error!(target = %self.target, "Max failures ({}) reached, stopping mapping job", count);
            return Err(MappingError::MaxFailures { count });
        }
        Ok(())
    }

    pub fn has_failures(&self) -> bool {
        self.count() > 0
    }

    pub fn count(&self) -> usize {
        self.stats.total()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
