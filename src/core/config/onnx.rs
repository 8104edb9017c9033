//! ONNX Runtime configuration types.

use serde::{Deserialize, Serialize};

/// Graph optimization levels for ONNX Runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrtGraphOptimizationLevel {
    /// Disable all optimizations.
    DisableAll,
    /// Enable basic optimizations.
    Level1,
    /// Enable extended optimizations.
    Level2,
    /// Enable all optimizations.
    #[default]
    Level3,
}

/// Execution providers for ONNX Runtime, in order of preference when listed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum OrtExecutionProvider {
    /// CPU execution provider (always available)
    #[default]
    CPU,
    /// NVIDIA CUDA execution provider
    CUDA {
        /// CUDA device ID (default: 0)
        device_id: Option<i32>,
        /// Memory limit in bytes (optional)
        gpu_mem_limit: Option<usize>,
    },
    /// TensorRT execution provider
    TensorRT {
        /// TensorRT device ID (default: 0)
        device_id: Option<i32>,
        /// FP16 enable flag
        fp16_enable: Option<bool>,
    },
}

impl OrtExecutionProvider {
    /// Parses a device string such as `cpu`, `cuda` or `cuda:1`.
    ///
    /// Accelerator devices get a CPU fallback appended so a session can still
    /// be created on hosts without the accelerator.
    pub fn from_device(device: &str) -> Result<Vec<Self>, super::ConfigError> {
        let device = device.trim().to_ascii_lowercase();
        if device == "cpu" {
            return Ok(vec![Self::CPU]);
        }

        let device_id = if device == "cuda" {
            0
        } else if let Some(id) = device.strip_prefix("cuda:") {
            id.parse::<i32>()
                .map_err(|_| super::ConfigError::InvalidConfig {
                    message: format!("Invalid CUDA device index in '{}'", device),
                })?
        } else {
            return Err(super::ConfigError::InvalidConfig {
                message: format!(
                    "Unsupported device: {}. Supported devices: cpu, cuda, cuda:N",
                    device
                ),
            });
        };

        Ok(vec![
            Self::CUDA {
                device_id: Some(device_id),
                gpu_mem_limit: None,
            },
            Self::CPU,
        ])
    }
}

/// Configuration for ONNX Runtime sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrtSessionConfig {
    /// Number of threads used to parallelize execution within nodes
    #[serde(default)]
    pub intra_threads: Option<usize>,
    /// Number of threads used to parallelize execution across nodes
    #[serde(default)]
    pub inter_threads: Option<usize>,
    /// Enable parallel execution mode
    #[serde(default)]
    pub parallel_execution: Option<bool>,
    /// Graph optimization level
    #[serde(default)]
    pub optimization_level: Option<OrtGraphOptimizationLevel>,
    /// Execution providers in order of preference
    #[serde(default)]
    pub execution_providers: Option<Vec<OrtExecutionProvider>>,
}

impl OrtSessionConfig {
    /// Creates a new OrtSessionConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of intra-op threads.
    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = Some(threads);
        self
    }

    /// Sets the number of inter-op threads.
    pub fn with_inter_threads(mut self, threads: usize) -> Self {
        self.inter_threads = Some(threads);
        self
    }

    /// Enables or disables parallel execution.
    pub fn with_parallel_execution(mut self, enabled: bool) -> Self {
        self.parallel_execution = Some(enabled);
        self
    }

    /// Sets the graph optimization level.
    pub fn with_optimization_level(mut self, level: OrtGraphOptimizationLevel) -> Self {
        self.optimization_level = Some(level);
        self
    }

    /// Sets the execution providers.
    ///
    /// # Arguments
    ///
    /// * `providers` - Vector of execution providers in order of preference.
    pub fn with_execution_providers(mut self, providers: Vec<OrtExecutionProvider>) -> Self {
        self.execution_providers = Some(providers);
        self
    }

    /// Gets the execution providers, defaulting to CPU.
    pub fn get_execution_providers(&self) -> Vec<OrtExecutionProvider> {
        self.execution_providers
            .clone()
            .unwrap_or_else(|| vec![OrtExecutionProvider::CPU])
    }

    /// Returns true if any configured provider targets a GPU.
    pub fn uses_accelerator(&self) -> bool {
        self.get_execution_providers()
            .iter()
            .any(|ep| !matches!(ep, OrtExecutionProvider::CPU))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ort_session_config_builder() {
        let config = OrtSessionConfig::new()
            .with_intra_threads(4)
            .with_inter_threads(2)
            .with_optimization_level(OrtGraphOptimizationLevel::Level2);

        assert_eq!(config.intra_threads, Some(4));
        assert_eq!(config.inter_threads, Some(2));
        assert_eq!(
            config.optimization_level,
            Some(OrtGraphOptimizationLevel::Level2)
        );
        assert!(!config.uses_accelerator());
    }

    #[test]
    fn test_from_device() {
        assert_eq!(
            OrtExecutionProvider::from_device("cpu").unwrap(),
            vec![OrtExecutionProvider::CPU]
        );

        let providers = OrtExecutionProvider::from_device("CUDA:1").unwrap();
        assert_eq!(providers.len(), 2);
        assert!(matches!(
            providers[0],
            OrtExecutionProvider::CUDA {
                device_id: Some(1),
                ..
            }
        ));
        assert_eq!(providers[1], OrtExecutionProvider::CPU);

        assert!(OrtExecutionProvider::from_device("tpu").is_err());
        assert!(OrtExecutionProvider::from_device("cuda:x").is_err());
    }
}
