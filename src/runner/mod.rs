//! Concurrent execution and replicated benchmarking of simulations.
//!
//! [`ParallelRunner`] owns a long-lived worker pool and offers two modes:
//!
//! - [`ParallelRunner::run_concurrently`]: run a set of (possibly different)
//!   simulations once each, in parallel, and wait for all of them.
//! - [`ParallelRunner::run_benchmark`]: clone one template into a fixed batch,
//!   then execute the whole batch for a number of timed trials.

mod pool;

use std::time::Instant;

use tracing::{debug, info, instrument};

use crate::config::{Parallelism, RunnerConfig};
use crate::error::{ExecutionError, RunnerError, RunnerResult, ValidationError};
use crate::simulation::Simulation;

use self::pool::{execute_guarded, WorkerPool};

/// Runs simulations on a bounded worker pool.
///
/// Workers are started on construction and joined when the runner is dropped.
pub struct ParallelRunner {
    config: RunnerConfig,
    pool: WorkerPool,
}

impl ParallelRunner {
    /// Create a runner and start its worker pool.
    pub fn new(config: RunnerConfig) -> RunnerResult<Self> {
        config.validate()?;
        let pool = WorkerPool::start(&config.thread_name_prefix, config.worker_count())?;
        Ok(Self { config, pool })
    }

    /// Create a runner with [`RunnerConfig::default`].
    pub fn with_defaults() -> RunnerResult<Self> {
        Self::new(RunnerConfig::default())
    }

    /// Returns the configuration this runner was built with.
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Number of pool workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Returns true when called from a worker thread of any runner.
    #[must_use]
    pub fn on_worker_thread() -> bool {
        pool::current_pool().is_some()
    }

    /// Executes every simulation exactly once, concurrently, and waits for all.
    ///
    /// No cap beyond the pool size is applied. An empty input returns
    /// immediately. If any simulation fails, the remaining in-flight ones are
    /// waited for and the first failure is returned.
    #[instrument(skip_all)]
    pub fn run_concurrently<I>(&self, simulations: I) -> RunnerResult<()>
    where
        I: IntoIterator<Item = Box<dyn Simulation>>,
    {
        let batch: Vec<Box<dyn Simulation>> = simulations.into_iter().collect();
        if batch.is_empty() {
            return Ok(());
        }
        self.ensure_not_nested()?;

        let window = Parallelism::Unrestricted.window(self.worker_count());
        debug!(simulations = batch.len(), window, "fan-out started");
        self.pool.execute_batch(batch, window)?;
        Ok(())
    }

    /// Benchmarks `system_count` clones of `template` over `repetitions` trials
    /// using the runner's configured parallelism.
    ///
    /// See [`ParallelRunner::run_benchmark_with`].
    pub fn run_benchmark(
        &self,
        template: &dyn Simulation,
        system_count: usize,
        repetitions: usize,
    ) -> RunnerResult<Vec<f64>> {
        self.run_benchmark_with(template, system_count, repetitions, self.config.parallelism())
    }

    /// Benchmarks `system_count` clones of `template` over `repetitions` trials.
    ///
    /// The batch is cloned once, before any timing, and reused for every
    /// trial. Each trial executes the whole batch (at most `parallelism`
    /// instances at a time) and records its wall-clock duration in
    /// milliseconds. A batch of one runs directly on the calling thread.
    ///
    /// Returns one duration per trial, in trial order. Any clone or execution
    /// failure aborts the call and no durations are returned.
    #[instrument(skip(self, template), fields(simulation = template.name()))]
    pub fn run_benchmark_with(
        &self,
        template: &dyn Simulation,
        system_count: usize,
        repetitions: usize,
        parallelism: Parallelism,
    ) -> RunnerResult<Vec<f64>> {
        if system_count == 0 {
            return Err(ValidationError::ZeroSystemCount.into());
        }

        if system_count > 1 {
            self.ensure_not_nested()?;
        }
        let mut batch = clone_batch(template, system_count)?;

        let window = parallelism.window(self.worker_count());
        info!(system_count, repetitions, window, "benchmark started");

        let mut timings = Vec::with_capacity(repetitions);
        for trial in 0..repetitions {
            let started = Instant::now();
            batch = self.run_trial(batch, window)?;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            debug!(trial, elapsed_ms, "trial recorded");
            timings.push(elapsed_ms);
        }

        info!(trials = timings.len(), "benchmark finished");
        Ok(timings)
    }

    fn run_trial(
        &self,
        mut batch: Vec<Box<dyn Simulation>>,
        window: usize,
    ) -> RunnerResult<Vec<Box<dyn Simulation>>> {
        if let [single] = batch.as_mut_slice() {
            execute_guarded(single.as_mut()).map_err(|source| ExecutionError::SimulationFailed {
                index: 0,
                name: single.name().to_string(),
                source,
            })?;
            return Ok(batch);
        }
        self.pool.execute_batch(batch, window)
    }

    fn ensure_not_nested(&self) -> Result<(), ExecutionError> {
        if pool::current_pool() == Some(self.pool.id()) {
            return Err(ExecutionError::NestedDispatch);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ParallelRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelRunner")
            .field("config", &self.config)
            .field("workers", &self.worker_count())
            .finish()
    }
}

fn clone_batch(template: &dyn Simulation, system_count: usize) -> RunnerResult<Vec<Box<dyn Simulation>>> {
    (0..system_count)
        .map(|index| {
            template
                .clone_model()
                .map_err(|source| RunnerError::from(ExecutionError::CloneFailed { index, source }))
        })
        .collect()
}
