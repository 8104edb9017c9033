//! The core module of the segmentation pipeline.
//!
//! This module contains the fundamental components shared by everything else:
//! - Batch utilities and tensor aliases
//! - Configuration management
//! - Error handling
//! - ONNX Runtime inference
//! - Traits defining the seams to models, storage and hardware
//! - Input validation helpers
//!
//! It also provides re-exports of commonly used types and functions for convenience.

pub mod batch;
pub mod config;
pub mod errors;
pub mod inference;
pub mod traits;
pub mod validation;

pub use batch::{BatchSampler, Tensor3D, Tensor4D, Tensor5D};
pub use config::{ConfigError, ConfigValidator};
pub use errors::{SegError, SegResult, SimpleError};
pub use inference::{OrtCheckpointLoader, OrtSegmenter, load_session};
pub use traits::{
    CheckpointLoader, ResourceProbe, ResourceReport, SegmentationModel, VolumeIo,
};

/// Initializes the tracing subscriber for logging.
///
/// This function sets up the tracing subscriber with environment filter and formatting layer.
/// It's typically called at the start of an application to enable logging.
/// Without `RUST_LOG` the filter defaults to `info`.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
