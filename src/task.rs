//! Cancellable periodic task runner
//!
//! A single-flight repeating job: the work runs at most once at a time, the
//! period is measured from the start of one invocation to the start of the
//! next, and overruns skip ticks instead of queueing them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::Result;

/// Runs a unit of work repeatedly on a dedicated worker thread.
///
/// `start()` while already running is a no-op. `stop()` blocks the calling
/// thread until the in-flight invocation (and its remaining sleep) finishes;
/// after it returns no further invocations occur. A panic inside the job is
/// caught and logged, and the loop continues at the next scheduled tick.
pub struct PeriodicTask {
    job: Arc<dyn Fn() + Send + Sync + 'static>,
    period: Duration,
    should_run: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    name: String,
}

impl PeriodicTask {
    /// Create a task that will invoke `job` once per `period`.
    pub fn new<F>(name: impl Into<String>, period: Duration, job: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            job: Arc::new(job),
            period,
            should_run: Arc::new(AtomicBool::new(false)),
            worker: None,
            name: name.into(),
        }
    }

    /// Start invoking the job. No-op if the task is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.should_run.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let job = self.job.clone();
        let should_run = self.should_run.clone();
        let period = self.period;
        let name = self.name.clone();

        let handle = thread::Builder::new().name(self.name.clone()).spawn(move || {
            while should_run.load(Ordering::SeqCst) {
                let started = Instant::now();
                if catch_unwind(AssertUnwindSafe(|| job())).is_err() {
                    log::error!("{}: task iteration panicked, continuing", name);
                }
                let elapsed = started.elapsed();
                if elapsed < period {
                    thread::sleep(period - elapsed);
                }
            }
        })?;

        self.worker = Some(handle);
        Ok(())
    }

    /// Signal termination and join the worker thread.
    pub fn stop(&mut self) {
        self.should_run.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Whether the task is currently running.
    pub fn is_running(&self) -> bool {
        self.should_run.load(Ordering::SeqCst)
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
