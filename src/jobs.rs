//! Bounded-parallelism batch execution.
//!
//! A [`JobRunner`] executes a batch of independent jobs on a fixed number
//! of worker slots. Workers are self-feeding: each slot pulls its next job
//! from a shared queue when it finishes one, rather than having jobs
//! assigned up front, so completion order is nondeterministic by design.
//! When the queue drains, the last worker to decrement the running count
//! fires the batch-complete callback — guarded so it cannot fire twice even
//! if several workers race to be last.
//!
//! Each job runs in isolation: an error or panic inside one job is recorded
//! as that job's failure and never disturbs its siblings or the runner's
//! bookkeeping. Failed jobs are not retried; the caller gets the full
//! succeeded/failed partition and decides.
//!
//! Progress is throttled to decile crossings so that callback frequency
//! does not scale with batch size.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::{BundleError, Result};

/// One unit of batch work. Receives the batch's cancellation token so long
/// jobs can bail out cooperatively.
pub type Job = Box<dyn FnOnce(&CancelToken) -> Result<()> + Send>;

/// A cooperative cancellation signal shared by a batch.
///
/// Cancellation is checked between jobs (and inside jobs wherever they
/// choose to poll); there is no mid-job rollback.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Jobs already running finish (or poll the
    /// token); jobs still queued are recorded as cancelled failures.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The outcome partition of one batch. Indices refer to the order jobs
/// were submitted in; `succeeded.len() + failed.len()` always equals the
/// batch size.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Indices of jobs that completed successfully, ascending.
    pub succeeded: Vec<usize>,
    /// Indices and errors of jobs that failed (including cancelled ones),
    /// ascending by index.
    pub failed: Vec<(usize, BundleError)>,
}

impl BatchReport {
    /// Total number of jobs accounted for.
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// `true` if every job succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Callbacks and cancellation for one batch.
#[derive(Default)]
pub struct BatchOptions<'a> {
    /// Invoked with a fraction in `[0, 1]`, at most once per decile.
    pub progress: Option<&'a (dyn Fn(f32) + Sync)>,
    /// Invoked exactly once when the whole batch has completed.
    pub on_complete: Option<&'a (dyn Fn() + Sync)>,
    /// External cancellation signal; the runner creates a private one if
    /// absent.
    pub cancel: Option<&'a CancelToken>,
}

/// A bounded-parallelism executor for batches of independent jobs.
#[derive(Debug)]
pub struct JobRunner {
    workers: usize,
    busy: AtomicBool,
}

impl JobRunner {
    /// Default number of worker slots.
    pub const DEFAULT_WORKERS: usize = 4;

    /// Creates a runner with the given worker bound (clamped to at least 1).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            busy: AtomicBool::new(false),
        }
    }

    /// Executes `jobs` and blocks until the whole batch has completed.
    ///
    /// # Errors
    /// [`BundleError::Internal`] if called while a previous batch on this
    /// runner is still in flight. Individual job failures are never errors
    /// of `run`; they land in the report's `failed` partition.
    pub fn run(&self, jobs: Vec<Job>, opts: &BatchOptions<'_>) -> Result<BatchReport> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BundleError::Internal(
                "JobRunner::run called while a batch is still running".into(),
            ));
        }
        let report = self.run_locked(jobs, opts);
        self.busy.store(false, Ordering::SeqCst);
        Ok(report)
    }

    fn run_locked(&self, jobs: Vec<Job>, opts: &BatchOptions<'_>) -> BatchReport {
        let total = jobs.len();
        if total == 0 {
            if let Some(progress) = opts.progress {
                progress(1.0);
            }
            if let Some(on_complete) = opts.on_complete {
                on_complete();
            }
            return BatchReport::default();
        }

        let local_token = CancelToken::new();
        let cancel = opts.cancel.unwrap_or(&local_token);

        let (tx, rx) = crossbeam_channel::unbounded();
        for job in jobs.into_iter().enumerate() {
            // The queue is filled before any worker starts; push cannot fail.
            let _ = tx.send(job);
        }
        drop(tx);

        let worker_count = self.workers.min(total);
        let completed = AtomicUsize::new(0);
        let running = AtomicUsize::new(worker_count);
        let finished = AtomicBool::new(false);
        let outcomes: Mutex<Vec<(usize, Option<BundleError>)>> =
            Mutex::new(Vec::with_capacity(total));

        debug!("running batch of {total} jobs on {worker_count} workers");

        rayon::scope(|scope| {
            for _ in 0..worker_count {
                let rx = rx.clone();
                let completed = &completed;
                let running = &running;
                let finished = &finished;
                let outcomes = &outcomes;
                scope.spawn(move |_| {
                    loop {
                        if cancel.is_cancelled() {
                            // Discard the rest of the queue as cancelled.
                            while let Ok((index, _job)) = rx.try_recv() {
                                record(outcomes, index, Some(BundleError::Cancelled));
                                bump_progress(completed, total, opts.progress);
                            }
                            break;
                        }
                        let (index, job) = match rx.try_recv() {
                            Ok(next) => next,
                            Err(_) => break,
                        };
                        let error = match catch_unwind(AssertUnwindSafe(|| job(cancel))) {
                            Ok(Ok(())) => None,
                            Ok(Err(e)) => Some(e),
                            // as_ref: downcasting must see the payload, not
                            // the box holding it.
                            Err(payload) => Some(BundleError::Internal(format!(
                                "job {index} panicked: {}",
                                panic_message(payload.as_ref())
                            ))),
                        };
                        record(outcomes, index, error);
                        bump_progress(completed, total, opts.progress);
                    }

                    // Last worker out signals completion, exactly once.
                    if running.fetch_sub(1, Ordering::SeqCst) == 1
                        && !finished.swap(true, Ordering::SeqCst)
                    {
                        if let Some(on_complete) = opts.on_complete {
                            on_complete();
                        }
                    }
                });
            }
        });

        let mut recorded = outcomes.into_inner().unwrap_or_else(|p| p.into_inner());
        recorded.sort_by_key(|(index, _)| *index);

        let mut report = BatchReport::default();
        for (index, error) in recorded {
            match error {
                None => report.succeeded.push(index),
                Some(e) => report.failed.push((index, e)),
            }
        }
        report
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WORKERS)
    }
}

fn record(
    outcomes: &Mutex<Vec<(usize, Option<BundleError>)>>,
    index: usize,
    error: Option<BundleError>,
) {
    outcomes
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .push((index, error));
}

/// Reports progress only when the completed count crosses a decile, so a
/// UI-bound consumer sees at most ~10 callbacks per batch.
fn bump_progress(
    completed: &AtomicUsize,
    total: usize,
    progress: Option<&(dyn Fn(f32) + Sync)>,
) {
    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(progress) = progress {
        let before = (done - 1) * 10 / total;
        let after = done * 10 / total;
        if after > before {
            progress(done as f32 / total as f32);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
