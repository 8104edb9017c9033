//! File formats, staged output writing and host probing.

pub mod metaimage;
pub mod nifti;
pub mod probe;
pub mod volume_io;
pub mod voxels;

pub use metaimage::{read_metaimage, write_metaimage};
pub use nifti::{read_nifti, write_nifti};
pub use probe::SystemProbe;
pub use volume_io::{FileVolumeIo, PendingOutputs, VolumeFormat, case_id, strip_volume_extension};
pub use voxels::{Endianness, decode_voxels, encode_voxels};
