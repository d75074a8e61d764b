//! The simulation capability contract.
//!
//! A [`Simulation`] is an opaque, stateful unit of work supplied by the
//! caller. The runner only needs two capabilities from it: run to completion
//! ([`Simulation::execute`]) and produce an independent copy of itself
//! ([`Simulation::clone_model`]).

use std::error::Error as StdError;
use std::fmt;

/// Error raised by a simulation implementation.
///
/// The runner never inspects or retries these; it only reports them.
#[derive(Debug)]
pub struct SimulationError {
    message: String,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl SimulationError {
    /// Creates an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error that wraps an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for SimulationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

/// A unit of stateful work the runner can execute and replicate.
///
/// # Contract
/// - `execute` runs the unit to completion. It may be called many times on
///   the same instance (once per benchmark trial), so any per-run setup is the
///   implementation's responsibility.
/// - `clone_model` returns a new instance with the same initial
///   configuration and no mutable state shared with `self` or with any other
///   clone. Clones that secretly share state will race when executed
///   concurrently.
///
/// The runner moves each instance into exactly one worker per `execute`
/// call, so an instance is never executed concurrently with itself.
pub trait Simulation: Send + 'static {
    /// Runs the simulation to completion.
    fn execute(&mut self) -> Result<(), SimulationError>;

    /// Produces an independent copy of this simulation.
    fn clone_model(&self) -> Result<Box<dyn Simulation>, SimulationError>;

    /// Human-readable name used in logs and error messages.
    fn name(&self) -> &str {
        "simulation"
    }
}

impl fmt::Debug for dyn Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}
