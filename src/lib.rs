//! # simrunner - concurrent simulation harness
//!
//! simrunner executes independent, stateful simulation units concurrently and
//! measures wall-clock time across repeated trials. It is meant for measuring
//! how a simulation workload scales with the number of parallel workers.
//!
//! ## Core Concepts
//!
//! - **Simulation**: a unit of stateful work that can run to completion and
//!   produce independent clones of itself
//! - **Batch**: the fixed set of clones reused across every trial of one benchmark
//! - **Trial**: one timed execution pass over the batch
//! - **Parallelism**: the cap on how many simulations run at once
//!
//! ## Usage
//!
//! ```rust,ignore
//! use simrunner::{ParallelRunner, Parallelism, RunnerConfig};
//!
//! let runner = ParallelRunner::new(RunnerConfig::default())?;
//!
//! // Run heterogeneous simulations once each.
//! runner.run_concurrently(vec![Box::new(heat) as Box<dyn Simulation>, Box::new(flow)])?;
//!
//! // Clone `model` 16 times and time 10 trials with at most 4 in flight.
//! let timings_ms = runner.run_benchmark_with(&model, 16, 10, Parallelism::bounded(4)?)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod runner;
pub mod simulation;

// Re-export primary types at crate root for convenience
pub use config::{Parallelism, RunnerConfig, MAX_WORKERS};
pub use error::{ExecutionError, RunnerError, RunnerResult, ValidationError};
pub use runner::ParallelRunner;
pub use simulation::{Simulation, SimulationError};
