//! Checkpoint loader producing ONNX Runtime models.

use super::OrtSegmenter;
use crate::core::config::ModelLoadConfig;
use crate::core::errors::SegResult;
use crate::core::traits::{CheckpointLoader, SegmentationModel};
use std::path::Path;

/// Loads `*.onnx` checkpoints with a shared [`ModelLoadConfig`].
#[derive(Debug, Clone, Default)]
pub struct OrtCheckpointLoader {
    config: ModelLoadConfig,
}

impl OrtCheckpointLoader {
    /// Creates a loader using `config` for every checkpoint.
    pub fn new(config: ModelLoadConfig) -> Self {
        Self { config }
    }

    /// Returns the shared configuration.
    pub fn config(&self) -> &ModelLoadConfig {
        &self.config
    }
}

impl CheckpointLoader for OrtCheckpointLoader {
    fn load(&self, path: &Path) -> SegResult<Box<dyn SegmentationModel>> {
        let model = OrtSegmenter::from_config(&self.config, path)?;
        Ok(Box::new(model))
    }
}
