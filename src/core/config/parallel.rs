//! Shared parallel processing configuration.

use serde::{Deserialize, Serialize};

/// Controls how much CPU parallelism the pipeline uses outside of the model itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelPolicy {
    /// Maximum number of threads for the global rayon pool.
    /// If None, rayon uses its default (typically the number of CPU cores).
    #[serde(default)]
    pub max_threads: Option<usize>,

    /// Window batches with at most this many windows are extracted sequentially.
    /// Default: 2
    #[serde(default = "ParallelPolicy::default_window_threshold")]
    pub window_threshold: usize,
}

impl ParallelPolicy {
    /// Create a new ParallelPolicy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of threads.
    pub fn with_max_threads(mut self, max_threads: Option<usize>) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set the window extraction threshold.
    pub fn with_window_threshold(mut self, threshold: usize) -> Self {
        self.window_threshold = threshold;
        self
    }

    /// Returns true when `count` items should be processed in parallel.
    pub fn should_parallelize(&self, count: usize) -> bool {
        count > self.window_threshold
    }

    /// Installs the global rayon pool if a thread limit is configured.
    ///
    /// The global pool can only be configured once per process; later calls are
    /// logged and ignored.
    pub fn install(&self) {
        if let Some(threads) = self.max_threads
            && let Err(err) = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
        {
            tracing::warn!("rayon pool already initialized, keeping it: {}", err);
        }
    }

    fn default_window_threshold() -> usize {
        2
    }
}

impl Default for ParallelPolicy {
    fn default() -> Self {
        Self {
            max_threads: None,
            window_threshold: Self::default_window_threshold(),
        }
    }
}
