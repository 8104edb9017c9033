//! Structures and helpers for ONNX Runtime inference.
//!
//! A checkpoint becomes an [`OrtSegmenter`] (a pool of sessions implementing
//! [`SegmentationModel`](crate::core::traits::SegmentationModel)); the
//! [`OrtCheckpointLoader`] is what the pipeline driver uses to create them.

pub mod loader;
pub mod ort_segmenter;
pub mod session;

pub use loader::OrtCheckpointLoader;
pub use ort_segmenter::OrtSegmenter;
pub use session::load_session;
