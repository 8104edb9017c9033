//! Predictors turning models into full-volume predictions.
//!
//! [`SlidingWindowInferer`] tiles a volume into model-sized windows and blends
//! the per-window outputs back into one probability map.

pub mod sliding_window;

pub use sliding_window::{SlidingWindowInferer, prepare_input};
