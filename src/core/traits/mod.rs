//! Trait definitions for the segmentation pipeline.
//!
//! The pipeline talks to the outside world through a small set of seams:
//!
//! ```text
//! ┌──────────────┐    ┌────────────────┐    ┌───────────────────┐    ┌──────────────┐
//! │VolumeIo      │───▶│CheckpointLoader│───▶│SegmentationModel  │───▶│VolumeIo      │
//! │• load        │    │• load          │    │• predict (window  │    │• save        │
//! │              │    │                │    │  batches)         │    │              │
//! └──────────────┘    └────────────────┘    └───────────────────┘    └──────────────┘
//! ```
//!
//! `ResourceProbe` sits beside the chain and is advisory only.

pub mod io;
pub mod model;
pub mod probe;

pub use io::VolumeIo;
pub use model::{CheckpointLoader, SegmentationModel};
pub use probe::{ResourceProbe, ResourceReport};
