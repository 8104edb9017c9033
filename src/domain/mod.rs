//! Domain-level structures shared across the segmentation pipeline.
//!
//! Volumes and the maps derived from them, the augmentation variants applied
//! during test-time augmentation, and the checkpoints that make up the ensemble.

pub mod augmentation;
pub mod checkpoint;
pub mod volume;

pub use augmentation::{AugmentationVariant, MAX_VARIANTS, VariantPool};
pub use checkpoint::{Checkpoint, CheckpointSet, LoadedCheckpoint};
pub use volume::{Geometry, ProbabilityMap, ScalarType, SegmentationMask, Volume};
