//! Failure statistics.

use drift_core::metrics::events::FailureStage;

/// Failure counts by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureStats {
    pub map: usize,
    pub publish: usize,
    pub decode: usize,
    pub submit: usize,
}

impl FailureStats {
    pub fn increment(&mut self, stage: FailureStage) {
        match stage {
            FailureStage::Map => self.map += 1,
            FailureStage::Publish => self.publish += 1,
            FailureStage::Decode => self.decode += 1,
            FailureStage::Submit => self.submit += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.map + self.publish + self.decode + self.submit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_stats_increment() {
        let mut stats = FailureStats::default();
        stats.increment(FailureStage::Submit);
        stats.increment(FailureStage::Submit);
        stats.increment(FailureStage::Decode);

        assert_eq!(stats.submit, 2);
        assert_eq!(stats.decode, 1);
        assert_eq!(stats.total(), 3);
    }
}
