//! Error types for the segmentation pipeline.
//!
//! This module defines the errors that can occur while loading volumes and
//! checkpoints, running sliding-window inference, aggregating the ensemble and
//! writing outputs. It also provides helper constructors that attach the
//! appropriate context to each error.
//!
//! # Usage
//!
//! ```rust
//! use autopet_infer::core::errors::SegError;
//!
//! let error = SegError::shape_mismatch("paired input channels", &[96, 96, 96], &[96, 96, 80]);
//! assert!(error.to_string().contains("shape mismatch"));
//!
//! let config_error = SegError::config_error("no checkpoints found in /opt/algorithm/weights");
//! assert!(config_error.is_configuration());
//! ```

use thiserror::Error;

/// Enum representing the errors that can occur in the segmentation pipeline.
///
/// The first four variants form the pipeline's failure taxonomy; the remaining
/// ones wrap lower-level failures with context.
#[derive(Error, Debug)]
pub enum SegError {
    /// Missing checkpoints, missing input files or invalid settings.
    #[error("configuration: {message}")]
    Configuration {
        /// A message describing the configuration error.
        message: String,
    },

    /// Two arrays that must agree in shape do not.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Where the mismatch was detected.
        context: String,
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape.
        actual: Vec<usize>,
    },

    /// The accelerator could not process a window batch.
    #[error("resource exhausted: {context}")]
    ResourceExhausted {
        /// Description of the failed operation.
        context: String,
        /// The underlying error reported by the runtime.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Aggregation was requested without any probability map.
    #[error("ensemble is empty: at least one probability map is required")]
    EmptyEnsemble,

    /// Error raised by a model during inference.
    #[error("inference failed for model '{model_name}': {context}")]
    Inference {
        /// Name of the model that failed.
        model_name: String,
        /// Additional context about the failure.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A model file could not be turned into a session.
    #[error("failed to load model '{model_path}': {reason}{suggestion}")]
    ModelLoad {
        /// Path of the model file.
        model_path: String,
        /// Short reason description.
        reason: String,
        /// Formatted suggestion, possibly empty.
        suggestion: String,
        /// The underlying error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// An image container could not be parsed or written.
    #[error("{path}: {message}")]
    Format {
        /// File the error refers to.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// Error from the ONNX Runtime session.
    #[error(transparent)]
    Session(#[from] ort::Error),

    /// Error from tensor operations.
    #[error("tensor operation")]
    Tensor(#[from] ndarray::ShapeError),

    /// JSON (de)serialization error.
    #[error("json")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

/// Convenient result alias for pipeline operations.
pub type SegResult<T> = Result<T, SegError>;

/// Minimal error carrying only a message, used as a `source` where no richer error exists.
#[derive(Debug, Clone)]
pub struct SimpleError {
    message: String,
}

impl SimpleError {
    /// Creates a new SimpleError.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SimpleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SimpleError {}

impl SegError {
    /// Creates a configuration error.
    ///
    /// # Arguments
    ///
    /// * `message` - A message describing the configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a configuration error for a specific field.
    pub fn config_error_with_context(field: &str, value: &str, reason: &str) -> Self {
        Self::Configuration {
            message: format!(
                "Configuration error in field '{}' with value '{}': {}",
                field, value, reason
            ),
        }
    }

    /// Creates a shape mismatch error.
    ///
    /// # Arguments
    ///
    /// * `context` - Where the mismatch was detected.
    /// * `expected` - The expected shape.
    /// * `actual` - The actual shape.
    pub fn shape_mismatch(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Creates an error for invalid input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a container format error for the given file.
    pub fn format_error(path: impl AsRef<std::path::Path>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// Creates an inference error with model context.
    ///
    /// Runtime failures caused by allocation problems are classified as
    /// [`SegError::ResourceExhausted`] so the driver can treat them as fatal to the run.
    ///
    /// # Arguments
    ///
    /// * `model_name` - The name of the model where inference failed.
    /// * `context` - Additional context about the error.
    /// * `error` - The underlying error that caused this error.
    pub fn inference_error(
        model_name: &str,
        context: &str,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        if is_allocation_failure(&error.to_string()) {
            return Self::ResourceExhausted {
                context: format!("model '{}': {}", model_name, context),
                source: Some(Box::new(error)),
            };
        }
        Self::Inference {
            model_name: model_name.to_string(),
            context: context.to_string(),
            source: Box::new(error),
        }
    }

    /// Creates an error for model load failures with an optional suggestion.
    ///
    /// # Arguments
    /// * `model_path` - Path to the model file
    /// * `reason` - Short reason description
    /// * `suggestion` - Optional suggestion message (without punctuation)
    /// * `source` - Optional underlying error
    pub fn model_load_error(
        model_path: impl AsRef<std::path::Path>,
        reason: impl Into<String>,
        suggestion: Option<&str>,
        source: Option<impl std::error::Error + Send + Sync + 'static>,
    ) -> Self {
        let suggestion = suggestion
            .map(|s| format!("; suggested fix: {}", s))
            .unwrap_or_default();
        Self::ModelLoad {
            model_path: model_path.as_ref().display().to_string(),
            reason: reason.into(),
            suggestion,
            source: source.map(|e| Box::new(e) as _),
        }
    }

    /// Returns true for [`SegError::Configuration`].
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns true for [`SegError::ShapeMismatch`].
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, Self::ShapeMismatch { .. })
    }

    /// Returns true for [`SegError::ResourceExhausted`].
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

fn is_allocation_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("out of memory")
        || lower.contains("failed to allocate")
        || lower.contains("bad_alloc")
        || lower.contains("cudaerrormemoryallocation")
}

impl From<crate::core::config::ConfigError> for SegError {
    fn from(error: crate::core::config::ConfigError) -> Self {
        Self::Configuration {
            message: error.to_string(),
        }
    }
}
