//! Bounded, thread-based worker pool.
//!
//! Workers pull jobs from a bounded channel. Each job carries ownership of one
//! simulation instance; the worker executes it and hands the instance back on
//! the job's reply channel, so a batch can be re-dispatched trial after trial
//! without ever sharing an instance between threads.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::{ExecutionError, RunnerResult};
use crate::simulation::{Simulation, SimulationError};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static WORKER_OF: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Returns the id of the pool owning the current thread, if any.
pub(crate) fn current_pool() -> Option<u64> {
    WORKER_OF.with(Cell::get)
}

struct Job {
    index: usize,
    simulation: Box<dyn Simulation>,
    reply: Sender<Completion>,
}

struct Completion {
    index: usize,
    simulation: Box<dyn Simulation>,
    outcome: Result<(), SimulationError>,
}

/// Runs `execute`, converting a panic into a [`SimulationError`].
pub(crate) fn execute_guarded(simulation: &mut dyn Simulation) -> Result<(), SimulationError> {
    match panic::catch_unwind(AssertUnwindSafe(|| simulation.execute())) {
        Ok(outcome) => outcome,
        Err(payload) => Err(SimulationError::new(format!(
            "simulation panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

pub(crate) struct WorkerPool {
    id: u64,
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn start(name_prefix: &str, workers: usize) -> RunnerResult<Self> {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let workers = workers.max(1);
        // One slot per worker: batches never keep more than `workers` jobs in flight.
        let (tx, rx) = bounded::<Job>(workers);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{name_prefix}-{idx}"))
                .spawn(move || {
                    WORKER_OF.with(|owner| owner.set(Some(id)));
                    while let Ok(Job {
                        index,
                        mut simulation,
                        reply,
                    }) = rx.recv()
                    {
                        let outcome = execute_guarded(simulation.as_mut());
                        let _ = reply.send(Completion {
                            index,
                            simulation,
                            outcome,
                        });
                    }
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    drop(tx);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(ExecutionError::WorkerSpawn {
                        message: err.to_string(),
                    }
                    .into());
                }
            }
        }

        debug!(pool = id, workers, "worker pool started");
        Ok(Self {
            id,
            tx,
            workers: handles,
        })
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn submit(&self, job: Job) -> Result<(), ExecutionError> {
        self.tx.send(job).map_err(|_| ExecutionError::Disconnected)
    }

    /// Executes every instance of `batch` once, keeping at most `window` in flight.
    ///
    /// Blocks until all submitted instances have reported back. After the first
    /// failure no further instances are submitted; the ones already running are
    /// still waited for. The first failure (in completion order) is returned.
    /// On success the batch comes back in its original order.
    pub(crate) fn execute_batch(
        &self,
        batch: Vec<Box<dyn Simulation>>,
        window: usize,
    ) -> RunnerResult<Vec<Box<dyn Simulation>>> {
        let total = batch.len();
        let window = window.max(1);
        let (reply_tx, reply_rx) = unbounded::<Completion>();

        let mut slots: Vec<Option<Box<dyn Simulation>>> =
            std::iter::repeat_with(|| None).take(total).collect();
        let mut pending = batch.into_iter().enumerate();
        let mut in_flight = 0usize;
        let mut completed = 0usize;
        let mut failures = 0usize;
        let mut first_failure: Option<ExecutionError> = None;

        loop {
            while first_failure.is_none() && in_flight < window {
                let Some((index, simulation)) = pending.next() else {
                    break;
                };
                self.submit(Job {
                    index,
                    simulation,
                    reply: reply_tx.clone(),
                })?;
                in_flight += 1;
            }
            if in_flight == 0 {
                break;
            }

            let Completion {
                index,
                simulation,
                outcome,
            } = reply_rx.recv().map_err(|_| ExecutionError::Disconnected)?;
            in_flight -= 1;
            completed += 1;

            if let Err(source) = outcome {
                failures += 1;
                if first_failure.is_none() {
                    first_failure = Some(ExecutionError::SimulationFailed {
                        index,
                        name: simulation.name().to_string(),
                        source,
                    });
                } else {
                    debug!(index, error = %source, "additional simulation failure");
                }
            }
            slots[index] = Some(simulation);
        }

        if let Some(err) = first_failure {
            warn!(
                pool = self.id,
                failures,
                skipped = total - completed,
                error = %err,
                "batch aborted"
            );
            return Err(err.into());
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Closes the job queue and joins every worker. Returns how many were joined.
    pub(crate) fn shutdown(&mut self) -> usize {
        // Swapping in a fresh sender drops the live one; workers drain and exit.
        drop(std::mem::replace(&mut self.tx, bounded::<Job>(1).0));
        let joined = self.workers.len();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if joined > 0 {
            debug!(pool = self.id, workers = joined, "worker pool stopped");
        }
        joined
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Probe {
        id: usize,
        runs: Arc<AtomicUsize>,
        threads: Arc<Mutex<Vec<Option<String>>>>,
        fail: bool,
    }

    impl Probe {
        fn boxed(id: usize, runs: &Arc<AtomicUsize>, threads: &Arc<Mutex<Vec<Option<String>>>>) -> Box<dyn Simulation> {
            Box::new(Self {
                id,
                runs: Arc::clone(runs),
                threads: Arc::clone(threads),
                fail: false,
            })
        }
    }

    impl Simulation for Probe {
        fn execute(&mut self) -> Result<(), SimulationError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.threads
                .lock()
                .unwrap()
                .push(thread::current().name().map(str::to_string));
            thread::sleep(Duration::from_millis(5));
            if self.fail {
                return Err(SimulationError::new(format!("probe {} failed", self.id)));
            }
            Ok(())
        }

        fn clone_model(&self) -> Result<Box<dyn Simulation>, SimulationError> {
            Ok(Box::new(Self {
                id: self.id,
                runs: Arc::clone(&self.runs),
                threads: Arc::clone(&self.threads),
                fail: self.fail,
            }))
        }

        fn name(&self) -> &str {
            "probe"
        }
    }

    struct Panicker;

    impl Simulation for Panicker {
        fn execute(&mut self) -> Result<(), SimulationError> {
            panic!("boom");
        }

        fn clone_model(&self) -> Result<Box<dyn Simulation>, SimulationError> {
            Ok(Box::new(Panicker))
        }
    }

    #[test]
    fn batch_runs_on_named_workers_and_returns_in_order() {
        let pool = WorkerPool::start("pool-test", 3).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let threads = Arc::new(Mutex::new(Vec::new()));
        let batch: Vec<_> = (0..6).map(|id| Probe::boxed(id, &runs, &threads)).collect();

        let batch = pool.execute_batch(batch, 3).unwrap();
        assert_eq!(batch.len(), 6);
        assert_eq!(runs.load(Ordering::SeqCst), 6);
        for name in threads.lock().unwrap().iter() {
            assert!(name.as_deref().unwrap().starts_with("pool-test-"));
        }

        // Instances are handed back and can run again.
        pool.execute_batch(batch, 3).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn worker_threads_know_their_pool() {
        let pool = WorkerPool::start("pool-owner", 1).unwrap();
        assert_eq!(current_pool(), None);

        struct OwnerCheck(Arc<Mutex<Option<u64>>>);
        impl Simulation for OwnerCheck {
            fn execute(&mut self) -> Result<(), SimulationError> {
                *self.0.lock().unwrap() = current_pool();
                Ok(())
            }
            fn clone_model(&self) -> Result<Box<dyn Simulation>, SimulationError> {
                Ok(Box::new(OwnerCheck(Arc::clone(&self.0))))
            }
        }

        let seen = Arc::new(Mutex::new(None));
        pool.execute_batch(vec![Box::new(OwnerCheck(Arc::clone(&seen)))], 1)
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(pool.id()));
    }

    #[test]
    fn first_failure_stops_further_submission() {
        let pool = WorkerPool::start("pool-fail", 1).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let threads = Arc::new(Mutex::new(Vec::new()));
        let mut batch: Vec<_> = (0..4).map(|id| Probe::boxed(id, &runs, &threads)).collect();
        batch[0] = Box::new(Probe {
            id: 0,
            runs: Arc::clone(&runs),
            threads: Arc::clone(&threads),
            fail: true,
        });

        let err = pool.execute_batch(batch, 1).unwrap_err();
        let crate::RunnerError::Execution(ExecutionError::SimulationFailed { index, name, .. }) = err else {
            panic!("expected SimulationFailed, got {err:?}");
        };
        assert_eq!(index, 0);
        assert_eq!(name, "probe");
        // Window of one: nothing else was dispatched after the failure.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_is_reported_and_worker_survives() {
        let pool = WorkerPool::start("pool-panic", 1).unwrap();
        let err = pool.execute_batch(vec![Box::new(Panicker)], 1).unwrap_err();
        let source = err.simulation_error().unwrap();
        assert!(source.message().contains("boom"));

        let runs = Arc::new(AtomicUsize::new(0));
        let threads = Arc::new(Mutex::new(Vec::new()));
        pool.execute_batch(vec![Probe::boxed(0, &runs, &threads)], 1)
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_batch_returns_immediately() {
        let pool = WorkerPool::start("pool-empty", 2).unwrap();
        let batch = pool.execute_batch(Vec::new(), 2).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn shutdown_joins_all_workers_once() {
        let mut pool = WorkerPool::start("pool-stop", 3).unwrap();
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.shutdown(), 3);
        assert_eq!(pool.shutdown(), 0);
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn submit_after_shutdown_reports_disconnected() {
        let mut pool = WorkerPool::start("pool-closed", 1).unwrap();
        pool.shutdown();
        let runs = Arc::new(AtomicUsize::new(0));
        let threads = Arc::new(Mutex::new(Vec::new()));
        let err = pool
            .execute_batch(vec![Probe::boxed(0, &runs, &threads)], 1)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::RunnerError::Execution(ExecutionError::Disconnected)
        ));
    }
}
