//! The segmentation pipeline.
//!
//! [`PipelineDriver`] runs one case end to end. The scheduler decides which
//! augmentation variants fit the time budget, and [`InferenceStats`] records
//! what actually ran.

mod config;
pub mod driver;
pub mod scheduler;
pub mod stats;

pub use config::{PipelineConfig, Strategy};
pub use driver::{PipelineDriver, PipelineOutcome, PipelineState};
pub use scheduler::{CostEstimator, DynamicSchedule, TimeBudget, schedule};
pub use stats::{InferenceStats, PassRecord};
