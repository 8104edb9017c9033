//! Configuration management for the segmentation pipeline.
//!
//! This module provides configuration types, validation traits, and utilities
//! for configuring model sessions, sliding-window inference and test-time
//! augmentation.

pub mod errors;
pub mod inference;
pub mod model;
pub mod onnx;
pub mod parallel;

// Re-export commonly used types
pub use errors::{ConfigError, ConfigValidator};
pub use inference::{BlendMode, OutputActivation, SlidingWindowConfig, TtaConfig};
pub use model::ModelLoadConfig;
pub use onnx::*;
pub use parallel::ParallelPolicy;
