//! File-backed volume I/O and staged output writing.

use super::metaimage::{read_metaimage, write_metaimage};
use super::nifti::{read_nifti, write_nifti};
use crate::core::{SegError, SegResult, VolumeIo};
use crate::domain::Volume;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk container of a volume, chosen from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeFormat {
    /// `.mha` (inline data) or `.mhd` (detached data).
    MetaImage,
    /// `.nii` or `.nii.gz`.
    Nifti,
}

const EXTENSIONS: [(&str, VolumeFormat); 4] = [
    (".nii.gz", VolumeFormat::Nifti),
    (".nii", VolumeFormat::Nifti),
    (".mha", VolumeFormat::MetaImage),
    (".mhd", VolumeFormat::MetaImage),
];

impl VolumeFormat {
    /// Detects the format from the file name, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        EXTENSIONS
            .iter()
            .find(|(ext, _)| name.ends_with(ext))
            .map(|(_, format)| *format)
    }
}

impl fmt::Display for VolumeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MetaImage => f.write_str("MetaImage"),
            Self::Nifti => f.write_str("NIfTI"),
        }
    }
}

/// File name without its volume extension (`case.nii.gz` -> `case`).
pub fn strip_volume_extension(file_name: &str) -> &str {
    let lower = file_name.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map_or(file_name, |(ext, _)| &file_name[..file_name.len() - ext.len()])
}

/// Case identifier of an input volume: its file name without the extension.
pub fn case_id(path: &Path) -> SegResult<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SegError::invalid_input(format!("no file name in {}", path.display())))?;
    Ok(strip_volume_extension(name).to_string())
}

/// Reads and writes MetaImage and NIfTI files.
#[derive(Debug, Clone, Copy)]
pub struct FileVolumeIo {
    compress: bool,
}

impl FileVolumeIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether MetaImage output is zlib-compressed. NIfTI compression follows the
    /// `.gz` suffix instead.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    fn format_of(path: &Path) -> SegResult<VolumeFormat> {
        VolumeFormat::from_path(path).ok_or_else(|| {
            SegError::format_error(
                path,
                "unrecognized extension, expected .mha, .mhd, .nii or .nii.gz",
            )
        })
    }
}

impl Default for FileVolumeIo {
    fn default() -> Self {
        Self { compress: true }
    }
}

impl VolumeIo for FileVolumeIo {
    fn load(&self, path: &Path) -> SegResult<Volume> {
        let volume = match Self::format_of(path)? {
            VolumeFormat::MetaImage => read_metaimage(path)?,
            VolumeFormat::Nifti => read_nifti(path)?,
        };
        tracing::debug!(
            "Loaded {} ({:?}, {:?}, spacing {:?})",
            path.display(),
            volume.shape(),
            volume.scalar_type(),
            volume.geometry().spacing
        );
        Ok(volume)
    }

    fn save(&self, volume: &Volume, path: &Path) -> SegResult<()> {
        let format = Self::format_of(path)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        match format {
            VolumeFormat::MetaImage => write_metaimage(volume, path, self.compress),
            VolumeFormat::Nifti => write_nifti(volume, path),
        }
    }
}

/// Output files written under temporary names and renamed into place together.
///
/// Dropping without [`PendingOutputs::commit`] removes every staged file, so a
/// failed run leaves no partial outputs at the final paths.
#[derive(Debug, Default)]
pub struct PendingOutputs {
    staged: Vec<(PathBuf, PathBuf)>,
}

impl PendingOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the temporary path to write `target` to. The staged file is a
    /// hidden sibling that keeps the target's extension.
    pub fn stage(&mut self, target: impl Into<PathBuf>) -> SegResult<PathBuf> {
        let target = target.into();
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                SegError::invalid_input(format!("no file name in {}", target.display()))
            })?;
        let partial = target.with_file_name(format!(".partial-{}", name));
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        self.staged.push((partial.clone(), target));
        Ok(partial)
    }

    /// Number of staged files.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Renames every staged file to its target and returns the targets.
    pub fn commit(mut self) -> SegResult<Vec<PathBuf>> {
        let staged = std::mem::take(&mut self.staged);
        let mut committed = Vec::with_capacity(staged.len());
        let mut pending = staged.into_iter();
        while let Some((partial, target)) = pending.next() {
            if let Err(e) = fs::rename(&partial, &target) {
                // put back what is left so Drop cleans it up
                self.staged.push((partial, target));
                self.staged.extend(pending);
                return Err(e.into());
            }
            tracing::debug!("Committed {}", target.display());
            committed.push(target);
        }
        Ok(committed)
    }
}

impl Drop for PendingOutputs {
    fn drop(&mut self) {
        for (partial, _) in self.staged.drain(..) {
            if partial.exists()
                && let Err(e) = fs::remove_file(&partial)
            {
                tracing::warn!("Failed to remove {}: {}", partial.display(), e);
            }
        }
    }
}
