//! Checkpoint discovery and loading.

use crate::core::{CheckpointLoader, SegError, SegResult, SegmentationModel};
use std::path::{Path, PathBuf};

/// A trained model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    path: PathBuf,
    name: String,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("checkpoint")
            .to_string();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The ordered list of checkpoints to ensemble.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointSet {
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointSet {
    /// Creates a set from explicit paths, keeping their order.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            checkpoints: paths.into_iter().map(Checkpoint::new).collect(),
        }
    }

    /// Finds every `*.<extension>` file in `dir`, sorted by file name.
    ///
    /// A missing directory or an empty result is a configuration error.
    pub fn discover(dir: impl AsRef<Path>, extension: &str) -> SegResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(SegError::config_error(format!(
                "Checkpoint directory does not exist: {}",
                dir.display()
            )));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension));
            if path.is_file() && matches {
                paths.push(path);
            }
        }
        paths.sort();

        let set = Self::from_paths(paths);
        set.ensure_non_empty()?;
        tracing::info!(
            "Found {} checkpoint(s) in {}: {:?}",
            set.len(),
            dir.display(),
            set.iter().map(Checkpoint::name).collect::<Vec<_>>()
        );
        Ok(set)
    }

    /// Fails with a configuration error when no checkpoint is present.
    pub fn ensure_non_empty(&self) -> SegResult<()> {
        if self.checkpoints.is_empty() {
            return Err(SegError::config_error("Checkpoint set is empty"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints.iter()
    }

    /// Loads every checkpoint once, in order.
    pub fn load_all(&self, loader: &dyn CheckpointLoader) -> SegResult<Vec<LoadedCheckpoint>> {
        self.ensure_non_empty()?;
        self.checkpoints
            .iter()
            .map(|checkpoint| {
                tracing::info!("Loading checkpoint {}", checkpoint.path().display());
                Ok(LoadedCheckpoint {
                    checkpoint: checkpoint.clone(),
                    model: loader.load(checkpoint.path())?,
                })
            })
            .collect()
    }
}

/// A checkpoint together with its ready model.
#[derive(Debug)]
pub struct LoadedCheckpoint {
    pub checkpoint: Checkpoint,
    pub model: Box<dyn SegmentationModel>,
}
