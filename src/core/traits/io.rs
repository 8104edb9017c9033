//! Volume input/output trait.

use crate::core::SegResult;
use crate::domain::Volume;
use std::fmt::Debug;
use std::path::Path;

/// Reads and writes volumes, preserving geometry.
pub trait VolumeIo: Send + Sync + Debug {
    /// Loads the volume stored at `path`.
    fn load(&self, path: &Path) -> SegResult<Volume>;

    /// Writes `volume` to `path`, replacing any existing file.
    fn save(&self, volume: &Volume, path: &Path) -> SegResult<()>;
}
