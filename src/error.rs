//! Error types for simrunner.
//!
//! Runner failures are strongly typed using thiserror, split into a
//! validation category (bad inputs, rejected before any work starts) and an
//! execution category (failures while cloning or running simulations).

use thiserror::Error;

use crate::simulation::SimulationError;

/// Validation errors that occur before any simulation is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("System count must be at least 1")]
    ZeroSystemCount,

    #[error("Degree of parallelism must be at least 1")]
    ZeroParallelism,

    #[error("Worker count must be at least 1")]
    ZeroWorkers,

    #[error("Invalid runner configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors that occur while cloning or running simulations.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Simulation {index} ({name}) failed: {source}")]
    SimulationFailed {
        index: usize,
        name: String,
        #[source]
        source: SimulationError,
    },

    #[error("Cloning simulation {index} failed: {source}")]
    CloneFailed {
        index: usize,
        #[source]
        source: SimulationError,
    },

    #[error("Worker pool disconnected")]
    Disconnected,

    #[error("Cannot dispatch a batch from inside a runner worker")]
    NestedDispatch,

    #[error("Failed to spawn worker thread: {message}")]
    WorkerSpawn {
        message: String,
    },
}

/// Top-level error type for simrunner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl RunnerError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns the simulation-side error, if the failure came from a simulation.
    #[must_use]
    pub const fn simulation_error(&self) -> Option<&SimulationError> {
        match self {
            Self::Execution(
                ExecutionError::SimulationFailed { source, .. }
                | ExecutionError::CloneFailed { source, .. },
            ) => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;
