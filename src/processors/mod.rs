//! Array processing stages used around the model.
//!
//! * `normalization` - per-channel intensity normalization and channel stacking
//! * `windows` - sliding-window grids and blending weights
//! * `activation` - logits to probabilities
//! * `ensemble` - averaging of probability maps and thresholding

pub mod activation;
pub mod ensemble;
pub mod normalization;
pub mod windows;

pub use activation::apply_activation;
pub use ensemble::{BINARY_THRESHOLD, EnsembleAccumulator, aggregate, threshold_mask};
pub use normalization::{IntensityNormalization, stack_channels};
pub use windows::{Window, WindowGrid, importance_map, window_starts, window_step};
