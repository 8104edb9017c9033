//! Pipeline configuration and loading from JSON files.

use crate::core::config::{
    ConfigError, ConfigValidator, ModelLoadConfig, ParallelPolicy, SlidingWindowConfig, TtaConfig,
};
use crate::core::{SegError, SegResult};
use crate::processors::IntensityNormalization;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which processing strategy the run reports in its auxiliary artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    DataCentric,
    Baseline,
}

impl Strategy {
    /// Value written to the boolean artifact.
    pub fn is_data_centric(self) -> bool {
        matches!(self, Self::DataCentric)
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "data-centric" | "datacentric" => Ok(Self::DataCentric),
            "baseline" => Ok(Self::Baseline),
            other => Err(ConfigError::InvalidConfig {
                message: format!(
                    "Unknown strategy '{}'. Supported: data-centric, baseline",
                    other
                ),
            }),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataCentric => f.write_str("data-centric"),
            Self::Baseline => f.write_str("baseline"),
        }
    }
}

/// Everything a pipeline run needs, built once and handed to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root holding `images/ct/` and `images/pet/`.
    #[serde(default = "PipelineConfig::default_input_dir")]
    pub input_dir: PathBuf,
    /// Directory receiving the mask.
    #[serde(default = "PipelineConfig::default_output_dir")]
    pub output_dir: PathBuf,
    /// Path of the boolean strategy artifact.
    #[serde(default = "PipelineConfig::default_datacentric_path")]
    pub datacentric_path: PathBuf,
    /// Directory holding the checkpoints.
    #[serde(default = "PipelineConfig::default_weights_dir")]
    pub weights_dir: PathBuf,
    /// Optional directory receiving NIfTI copies of inputs and prediction.
    #[serde(default)]
    pub intermediate_dir: Option<PathBuf>,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub sliding_window: SlidingWindowConfig,
    #[serde(default)]
    pub tta: TtaConfig,
    #[serde(default)]
    pub model: ModelLoadConfig,
    #[serde(default)]
    pub parallel: ParallelPolicy,
    /// Normalization for the CT and PET channels, in that order.
    #[serde(default)]
    pub normalization: [IntensityNormalization; 2],
    /// Keep completed maps when a non-identity variant fails with a shape mismatch.
    #[serde(default)]
    pub tolerate_variant_failures: bool,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_datacentric_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.datacentric_path = path.into();
        self
    }

    pub fn with_weights_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.weights_dir = dir.into();
        self
    }

    pub fn with_intermediate_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.intermediate_dir = dir;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_sliding_window(mut self, config: SlidingWindowConfig) -> Self {
        self.sliding_window = config;
        self
    }

    pub fn with_tta(mut self, config: TtaConfig) -> Self {
        self.tta = config;
        self
    }

    pub fn with_model(mut self, config: ModelLoadConfig) -> Self {
        self.model = config;
        self
    }

    pub fn with_parallel(mut self, policy: ParallelPolicy) -> Self {
        self.parallel = policy;
        self
    }

    pub fn with_normalization(mut self, normalization: [IntensityNormalization; 2]) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_tolerate_variant_failures(mut self, tolerate: bool) -> Self {
        self.tolerate_variant_failures = tolerate;
        self
    }

    /// Loads a configuration from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> SegResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SegError::config_error(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SegError::config_error(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn default_input_dir() -> PathBuf {
        PathBuf::from("/input/")
    }

    fn default_output_dir() -> PathBuf {
        PathBuf::from("/output/images/automated-petct-lesion-segmentation/")
    }

    fn default_datacentric_path() -> PathBuf {
        PathBuf::from("/output/data-centric-model.json")
    }

    fn default_weights_dir() -> PathBuf {
        PathBuf::from("/opt/algorithm/weights/")
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: Self::default_input_dir(),
            output_dir: Self::default_output_dir(),
            datacentric_path: Self::default_datacentric_path(),
            weights_dir: Self::default_weights_dir(),
            intermediate_dir: None,
            strategy: Strategy::default(),
            sliding_window: SlidingWindowConfig::default(),
            tta: TtaConfig::default(),
            model: ModelLoadConfig::default(),
            parallel: ParallelPolicy::default(),
            normalization: [IntensityNormalization::default(); 2],
            tolerate_variant_failures: false,
        }
    }
}

impl ConfigValidator for PipelineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.sliding_window.validate()?;
        self.tta.validate()?;
        self.model.validate()?;
        for norm in &self.normalization {
            norm.validate().map_err(|e| ConfigError::InvalidConfig {
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}
