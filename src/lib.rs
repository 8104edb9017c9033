//! # autopet-infer
//!
//! Lesion segmentation inference for paired PET/CT volumes using ONNX models.
//!
//! A case is a CT and a PET volume on the same voxel grid. Every checkpoint in
//! the weights directory is run over the stacked pair with sliding-window
//! inference, optionally on flipped copies of the input (test-time
//! augmentation), and the resulting probability maps are averaged into a
//! binary lesion mask.
//!
//! ## Features
//!
//! - MetaImage (`.mha`/`.mhd`) and NIfTI-1 (`.nii`/`.nii.gz`) input and output
//! - Sliding-window inference with Gaussian blending of overlapping windows
//! - Test-time augmentation bounded by a wall-clock budget
//! - Checkpoint ensembling with streaming aggregation
//! - ONNX Runtime backend with optional CUDA and TensorRT providers
//!
//! ## Modules
//!
//! * [`core`] - Error types, configuration, model traits and the ONNX Runtime backend
//! * [`domain`] - Volumes, masks, augmentation variants and checkpoints
//! * [`processors`] - Normalization, window grids, activations and ensembling
//! * [`predictors`] - The sliding-window inferer
//! * [`pipeline`] - Time-budget scheduling and the end-to-end driver
//! * [`utils`] - Image containers, staged output writing and GPU probing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use autopet_infer::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::new()
//!     .with_input_dir("/input/")
//!     .with_weights_dir("/opt/algorithm/weights/")
//!     .with_strategy(Strategy::DataCentric);
//!
//! let mut driver = PipelineDriver::new(config);
//! let outcome = driver.run()?;
//! println!("mask written to {}", outcome.mask_path.display());
//! # Ok(())
//! # }
//! ```
//!
//! ### Running a single model on a volume pair
//!
//! ```rust,no_run
//! use autopet_infer::prelude::*;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let io = FileVolumeIo::new();
//! let ct = io.load(Path::new("CTres.nii.gz"))?;
//! let pet = io.load(Path::new("SUV.nii.gz"))?;
//!
//! let model = OrtCheckpointLoader::new(ModelLoadConfig::default())
//!     .load(Path::new("fold_0.onnx"))?;
//! let inferer = SlidingWindowInferer::new(SlidingWindowConfig::default())?;
//! let map = inferer.infer(&ct, &pet, model.as_ref(), &[IntensityNormalization::ZScore; 2])?;
//! let (_, mask) = aggregate(&[map])?;
//! io.save(&mask.to_volume(), Path::new("PRED.nii.gz"))?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod domain;
pub mod pipeline;
pub mod predictors;
pub mod processors;
pub mod utils;

/// Prelude module for convenient imports.
///
/// ```rust
/// use autopet_infer::prelude::*;
/// ```
///
/// Covers running the pipeline, loading volumes and running a model by hand.
/// Lower-level pieces (window grids, the scheduler, container codecs) are
/// imported from their modules.
pub mod prelude {
    // Pipeline
    pub use crate::pipeline::{PipelineConfig, PipelineDriver, PipelineOutcome, Strategy};

    // Configuration
    pub use crate::core::config::{
        ConfigValidator, ModelLoadConfig, SlidingWindowConfig, TtaConfig,
    };

    // Models and I/O
    pub use crate::core::{CheckpointLoader, OrtCheckpointLoader, SegmentationModel, VolumeIo};
    pub use crate::predictors::SlidingWindowInferer;
    pub use crate::processors::{IntensityNormalization, aggregate};
    pub use crate::utils::FileVolumeIo;

    // Data
    pub use crate::domain::{Geometry, ProbabilityMap, SegmentationMask, Volume};

    // Error Handling
    pub use crate::core::{SegError, SegResult};
}
