//! Model (checkpoint) loading configuration.

use super::errors::{ConfigError, ConfigValidator};
use super::onnx::OrtSessionConfig;
use serde::{Deserialize, Serialize};

/// Settings shared by every checkpoint session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelLoadConfig {
    /// ONNX Runtime session configuration.
    #[serde(default)]
    pub ort_session: OrtSessionConfig,
    /// Number of sessions per checkpoint (>= 1).
    #[serde(default = "ModelLoadConfig::default_session_pool_size")]
    pub session_pool_size: usize,
    /// Input tensor name; detected from the model when absent.
    #[serde(default)]
    pub input_name: Option<String>,
    /// Output tensor name; the first model output when absent.
    #[serde(default)]
    pub output_name: Option<String>,
}

impl ModelLoadConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ORT session configuration.
    pub fn ort_session(mut self, config: OrtSessionConfig) -> Self {
        self.ort_session = config;
        self
    }

    /// Sets the session pool size.
    pub fn session_pool_size(mut self, size: usize) -> Self {
        self.session_pool_size = size;
        self
    }

    /// Sets the input tensor name.
    pub fn input_name(mut self, name: impl Into<String>) -> Self {
        self.input_name = Some(name.into());
        self
    }

    /// Sets the output tensor name.
    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    fn default_session_pool_size() -> usize {
        1
    }
}

impl Default for ModelLoadConfig {
    fn default() -> Self {
        Self {
            ort_session: OrtSessionConfig::default(),
            session_pool_size: Self::default_session_pool_size(),
            input_name: None,
            output_name: None,
        }
    }
}

impl ConfigValidator for ModelLoadConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.session_pool_size == 0 {
            return Err(ConfigError::InvalidConfig {
                message: "session_pool_size must be at least 1".to_string(),
            });
        }
        if let Some(threads) = self.ort_session.intra_threads {
            self.validate_thread_count(threads)?;
        }
        if let Some(threads) = self.ort_session.inter_threads {
            self.validate_thread_count(threads)?;
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}
