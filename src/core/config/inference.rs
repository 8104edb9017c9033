//! Sliding-window and test-time augmentation settings.

use super::errors::{ConfigError, ConfigValidator};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How overlapping window predictions are weighted during reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BlendMode {
    /// Gaussian falloff from the window center; sigma is `sigma_scale * window` per axis.
    Gaussian {
        /// Fraction of the window extent used as the standard deviation.
        sigma_scale: f64,
    },
    /// Every voxel of every window weighs the same.
    Constant,
}

impl Default for BlendMode {
    fn default() -> Self {
        Self::Gaussian { sigma_scale: 0.125 }
    }
}

/// Activation applied to raw model outputs before blending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputActivation {
    /// Element-wise logistic function.
    Sigmoid,
    /// Softmax over the class channel.
    #[default]
    Softmax,
    /// The model already emits probabilities.
    Identity,
}

/// Configuration of the sliding-window inference engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Window extent as `[z, y, x]`.
    #[serde(default = "SlidingWindowConfig::default_window_size")]
    pub window_size: [usize; 3],
    /// Fraction of the window shared by neighbouring windows, in `[0, 1)`.
    #[serde(default = "SlidingWindowConfig::default_overlap")]
    pub overlap: f64,
    /// Number of windows sent to the model per call.
    #[serde(default = "SlidingWindowConfig::default_batch_size")]
    pub batch_size: usize,
    /// Overlap blending weights.
    #[serde(default)]
    pub blend_mode: BlendMode,
    /// Output activation.
    #[serde(default)]
    pub activation: OutputActivation,
}

impl SlidingWindowConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the window size.
    pub fn with_window_size(mut self, window_size: [usize; 3]) -> Self {
        self.window_size = window_size;
        self
    }

    /// Sets the overlap fraction.
    pub fn with_overlap(mut self, overlap: f64) -> Self {
        self.overlap = overlap;
        self
    }

    /// Sets the window batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the blend mode.
    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    /// Sets the output activation.
    pub fn with_activation(mut self, activation: OutputActivation) -> Self {
        self.activation = activation;
        self
    }

    fn default_window_size() -> [usize; 3] {
        [128, 128, 128]
    }

    fn default_overlap() -> f64 {
        0.4
    }

    fn default_batch_size() -> usize {
        12
    }
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window_size: Self::default_window_size(),
            overlap: Self::default_overlap(),
            batch_size: Self::default_batch_size(),
            blend_mode: BlendMode::default(),
            activation: OutputActivation::default(),
        }
    }
}

impl ConfigValidator for SlidingWindowConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_window_size(self.window_size)?;
        self.validate_batch_size(self.batch_size)?;
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(ConfigError::InvalidConfig {
                message: format!("overlap must be in [0, 1), got {}", self.overlap),
            });
        }
        if let BlendMode::Gaussian { sigma_scale } = self.blend_mode {
            self.validate_f64_range(sigma_scale, f64::EPSILON, 10.0, "sigma_scale")?;
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Configuration of test-time augmentation scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtaConfig {
    /// When false only the identity pass runs.
    #[serde(default = "TtaConfig::default_enabled")]
    pub enabled: bool,
    /// Upper bound on variants per checkpoint, identity included (1..=8).
    #[serde(default = "TtaConfig::default_max_variants")]
    pub max_variants: usize,
    /// Re-estimate the per-variant cost from measured latencies.
    #[serde(default = "TtaConfig::default_dynamic")]
    pub dynamic: bool,
    /// Total wall-clock budget for all passes, in seconds.
    #[serde(default = "TtaConfig::default_max_time_secs")]
    pub max_time_secs: f64,
    /// A-priori cost of one pass in seconds; when absent the identity pass is measured.
    #[serde(default)]
    pub cost_estimate_secs: Option<f64>,
    /// Weight of the newest measurement in the running estimate.
    #[serde(default = "TtaConfig::default_smoothing")]
    pub smoothing: f64,
}

impl TtaConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables augmentation.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the maximum number of variants per checkpoint.
    pub fn with_max_variants(mut self, max_variants: usize) -> Self {
        self.max_variants = max_variants;
        self
    }

    /// Enables or disables dynamic cost estimation.
    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Sets the total time budget.
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time_secs = max_time.as_secs_f64();
        self
    }

    /// Sets the a-priori per-pass cost estimate.
    pub fn with_cost_estimate(mut self, cost: Duration) -> Self {
        self.cost_estimate_secs = Some(cost.as_secs_f64());
        self
    }

    /// Sets the smoothing factor.
    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Returns the time budget as a duration.
    pub fn max_time(&self) -> Duration {
        seconds_to_duration(self.max_time_secs)
    }

    /// Returns the a-priori cost estimate as a duration.
    pub fn cost_estimate(&self) -> Option<Duration> {
        self.cost_estimate_secs.map(seconds_to_duration)
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_max_variants() -> usize {
        8
    }

    fn default_dynamic() -> bool {
        true
    }

    fn default_max_time_secs() -> f64 {
        220.0
    }

    fn default_smoothing() -> f64 {
        0.5
    }
}

impl Default for TtaConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_variants: Self::default_max_variants(),
            dynamic: Self::default_dynamic(),
            max_time_secs: Self::default_max_time_secs(),
            cost_estimate_secs: None,
            smoothing: Self::default_smoothing(),
        }
    }
}

/// Largest number of seconds accepted for budgets and cost estimates.
const MAX_SECONDS: f64 = u64::MAX as f64 / 2.0;

/// Saturating conversion; negative and NaN inputs become zero.
fn seconds_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

impl ConfigValidator for TtaConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=8).contains(&self.max_variants) {
            return Err(ConfigError::InvalidConfig {
                message: format!("max_variants must be in 1..=8, got {}", self.max_variants),
            });
        }
        self.validate_f64_range(self.max_time_secs, 0.0, MAX_SECONDS, "max_time_secs")?;
        if let Some(cost) = self.cost_estimate_secs {
            self.validate_f64_range(cost, 0.0, MAX_SECONDS, "cost_estimate_secs")?;
        }
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(ConfigError::InvalidConfig {
                message: format!("smoothing must be in (0, 1], got {}", self.smoothing),
            });
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}
