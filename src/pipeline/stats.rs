//! Run statistics for the inference stage.

use crate::domain::AugmentationVariant;
use std::fmt;
use std::time::Duration;

/// One executed (checkpoint, variant) pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassRecord {
    pub checkpoint: String,
    pub variant: AugmentationVariant,
    pub latency: Duration,
}

/// Statistics for one pipeline run.
///
/// Tracks which passes ran, how long each took and how many variants the
/// scheduler left out.
#[derive(Debug, Clone, Default)]
pub struct InferenceStats {
    /// Executed passes in execution order.
    pub passes: Vec<PassRecord>,
    /// Variants the scheduler did not run.
    pub skipped_variants: usize,
    /// Variants abandoned after a tolerated failure.
    pub failed_variants: usize,
    /// Number of checkpoints in the ensemble.
    pub checkpoints: usize,
    /// Wall-clock time of the whole run.
    pub total_time: Duration,
}

impl InferenceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pass(
        &mut self,
        checkpoint: impl Into<String>,
        variant: AugmentationVariant,
        latency: Duration,
    ) {
        self.passes.push(PassRecord {
            checkpoint: checkpoint.into(),
            variant,
            latency,
        });
    }

    /// Number of executed passes, i.e. the ensemble size.
    pub fn executed(&self) -> usize {
        self.passes.len()
    }

    /// Total time spent in model passes.
    pub fn inference_time(&self) -> Duration {
        self.passes.iter().map(|p| p.latency).sum()
    }

    /// Mean pass latency, zero when nothing ran.
    pub fn average_latency(&self) -> Duration {
        match self.passes.len() {
            0 => Duration::ZERO,
            n => self.inference_time() / n as u32,
        }
    }
}

impl fmt::Display for InferenceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Inference Statistics:")?;
        writeln!(f, "  Checkpoints: {}", self.checkpoints)?;
        writeln!(f, "  Executed passes: {}", self.executed())?;
        writeln!(f, "  Skipped variants: {}", self.skipped_variants)?;
        if self.failed_variants > 0 {
            writeln!(f, "  Abandoned variants: {}", self.failed_variants)?;
        }
        for pass in &self.passes {
            writeln!(
                f,
                "    {} / {}: {:.2} s",
                pass.checkpoint,
                pass.variant,
                pass.latency.as_secs_f64()
            )?;
        }
        writeln!(
            f,
            "  Average pass latency: {:.2} s",
            self.average_latency().as_secs_f64()
        )?;
        writeln!(f, "  Total time: {:.2} s", self.total_time.as_secs_f64())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_averages() {
        let mut stats = InferenceStats::new();
        assert_eq!(stats.average_latency(), Duration::ZERO);
        stats.record_pass("fold0", AugmentationVariant::IDENTITY, Duration::from_secs(2));
        stats.record_pass("fold0", AugmentationVariant::IDENTITY, Duration::from_secs(4));
        assert_eq!(stats.executed(), 2);
        assert_eq!(stats.average_latency(), Duration::from_secs(3));
        assert!(stats.to_string().contains("Executed passes: 2"));
    }
}
