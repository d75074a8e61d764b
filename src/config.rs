//! Runner configuration.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum number of simulations a batch may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Parallelism {
    /// No explicit cap; the pool size decides.
    #[default]
    Unrestricted,
    /// At most this many concurrent executions.
    Bounded(NonZeroUsize),
}

impl Parallelism {
    /// Creates a bounded setting, rejecting zero.
    pub fn bounded(max: usize) -> Result<Self, ValidationError> {
        NonZeroUsize::new(max)
            .map(Self::Bounded)
            .ok_or(ValidationError::ZeroParallelism)
    }

    /// Resolves the number of in-flight executions for a pool of `workers`.
    #[must_use]
    pub fn window(self, workers: usize) -> usize {
        let workers = workers.max(1);
        match self {
            Self::Unrestricted => workers,
            Self::Bounded(max) => max.get().min(workers),
        }
    }
}

impl From<Option<NonZeroUsize>> for Parallelism {
    fn from(value: Option<NonZeroUsize>) -> Self {
        value.map_or(Self::Unrestricted, Self::Bounded)
    }
}

/// Upper bound on pool workers accepted by [`RunnerConfig::validate`].
pub const MAX_WORKERS: usize = 1024;

/// Configuration for a [`ParallelRunner`](crate::ParallelRunner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Number of pool workers. `None` uses the available hardware parallelism.
    pub workers: Option<usize>,
    /// Default parallelism cap for benchmarks. `None` means unrestricted.
    pub max_parallelism: Option<usize>,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            max_parallelism: None,
            thread_name_prefix: "simrunner-worker".to_string(),
        }
    }
}

impl RunnerConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == Some(0) {
            return Err(ValidationError::ZeroWorkers);
        }
        if let Some(workers) = self.workers.filter(|w| *w > MAX_WORKERS) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("workers must be at most {MAX_WORKERS}, got {workers}"),
            });
        }
        if self.max_parallelism == Some(0) {
            return Err(ValidationError::ZeroParallelism);
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "thread_name_prefix must not be empty".to_string(),
            });
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(ValidationError::InvalidConfig {
                reason: "thread_name_prefix must not contain NUL bytes".to_string(),
            });
        }
        Ok(())
    }

    /// Resolved pool size, never above [`MAX_WORKERS`].
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(4)
            })
            .min(MAX_WORKERS)
    }

    /// Default parallelism setting for benchmarks.
    #[must_use]
    pub fn parallelism(&self) -> Parallelism {
        self.max_parallelism.and_then(NonZeroUsize::new).into()
    }
}
