//! Model traits: the network behind a checkpoint and the loader that creates it.

use crate::core::{SegResult, Tensor5D};
use std::fmt::Debug;
use std::path::Path;

/// A trained segmentation network operating on batches of windows.
///
/// Input batches have shape `[batch, channels, z, y, x]`; the output must have
/// shape `[batch, classes, z, y, x]` with the same batch and spatial extents.
/// Implementations return raw scores; the caller applies the configured
/// activation.
pub trait SegmentationModel: Send + Sync + Debug {
    /// Human readable model name used in logs and errors.
    fn name(&self) -> &str;

    /// Number of input channels the model expects, if known.
    fn input_channels(&self) -> Option<usize> {
        None
    }

    /// Fixed spatial window `[z, y, x]` the model expects, if its input is static.
    fn window_shape(&self) -> Option<[usize; 3]> {
        None
    }

    /// Runs the network on one batch of windows.
    fn predict(&self, batch: &Tensor5D) -> SegResult<Tensor5D>;
}

/// Turns a checkpoint file into a ready-to-run model.
pub trait CheckpointLoader: Send + Sync + Debug {
    /// Loads the checkpoint at `path`.
    fn load(&self, path: &Path) -> SegResult<Box<dyn SegmentationModel>>;

    /// File extension (without dot) identifying checkpoints this loader accepts.
    fn extension(&self) -> &str {
        "onnx"
    }
}
