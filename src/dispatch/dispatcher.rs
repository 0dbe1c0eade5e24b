//! Elastic dispatcher owning one job queue and its worker pool
//!
//! Lifecycle: uninitialized, then running (on first `add_job` or `start`),
//! then stopped. Stopped is terminal.
//!
//! Scaling is decided synchronously on every enqueue, under the dispatcher
//! lock, from the number of workers that were idle when the job was queued:
//!
//! - no idle worker and room below `max_threads`: add one worker
//! - more than `high_water_mark` idle workers and at least one elastically
//!   added worker alive: retire one
//!
//! Only elastically added workers are ever retired, so the pool never drops
//! below `initial_threads` once started.

use super::job::Job;
use super::pool::WorkerPool;
use super::queue::JobQueue;
use crate::core::error::{Error, Result};
use crate::system::Metrics;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default ceiling on how long `stop` waits for in-flight jobs
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Pool sizing options; set at most once per dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherOptions {
    /// Workers started by `start`
    pub initial_threads: usize,
    /// Hard ceiling on pool size
    pub max_threads: usize,
    /// Idle workers above which elastic workers are retired
    pub high_water_mark: usize,
}

impl DispatcherOptions {
    /// Used when the first job arrives before any options were set
    pub const FALLBACK: DispatcherOptions = DispatcherOptions {
        initial_threads: 5,
        max_threads: 50,
        high_water_mark: 20,
    };

    /// Check the bounds are consistent
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(Error::config("max_threads must be greater than 0"));
        }
        if self.initial_threads > self.max_threads {
            return Err(Error::config(format!(
                "initial_threads ({}) must not exceed max_threads ({})",
                self.initial_threads, self.max_threads
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Running,
    Stopped,
}

struct Engine {
    queue: Arc<JobQueue>,
    pool: WorkerPool,
}

struct Inner {
    options: Option<DispatcherOptions>,
    phase: Phase,
    engine: Option<Engine>,
    started: bool,
    elastic: usize,
}

/// Process-level job scheduler.
///
/// Construct one per service and hand out `Arc<Dispatcher>`; there is no
/// global instance. The engine provides no per-resource mutual exclusion:
/// callers that need "one command in flight per VM" must enforce it before
/// calling [`Dispatcher::add_job`].
pub struct Dispatcher {
    inner: Mutex<Inner>,
    initialized: Condvar,
    drain_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    /// Create an uninitialized dispatcher
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self::with_drain_timeout(metrics, DEFAULT_DRAIN_TIMEOUT)
    }

    /// Create an uninitialized dispatcher with a custom shutdown ceiling
    pub fn with_drain_timeout(metrics: Arc<Metrics>, drain_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                options: None,
                phase: Phase::Uninitialized,
                engine: None,
                started: false,
                elastic: 0,
            }),
            initialized: Condvar::new(),
            drain_timeout,
            metrics,
        }
    }

    /// Set the pool sizing options.
    ///
    /// Only the first call takes effect; later calls log a warning and are
    /// ignored. Inconsistent bounds are rejected without consuming the slot.
    pub fn set_options(&self, options: DispatcherOptions) -> Result<()> {
        options.validate()?;
        let mut inner = self.inner.lock();
        match inner.options {
            Some(current) => {
                warn!(?current, ignored = ?options, "dispatcher options already set");
            }
            None => {
                info!(
                    initial = options.initial_threads,
                    max = options.max_threads,
                    high_water = options.high_water_mark,
                    "dispatcher options set"
                );
                inner.options = Some(options);
            }
        }
        Ok(())
    }

    /// Options in effect, if any were set or defaulted
    pub fn options(&self) -> Option<DispatcherOptions> {
        self.inner.lock().options
    }

    /// Submit a job.
    ///
    /// Returns `true` if the job was queued. After [`Dispatcher::stop`] the
    /// job is logged and dropped and `false` is returned.
    pub fn add_job(&self, job: Box<dyn Job>) -> bool {
        let mut inner = self.inner.lock();
        self.ensure_initialized(&mut inner);

        if inner.phase == Phase::Stopped {
            error!(resource = %job.resource_id(), "dispatcher is stopped, dropping job");
            self.metrics.queue.jobs_rejected.inc();
            return false;
        }

        let resource = job.resource_id().clone();
        let options = inner.options.unwrap_or(DispatcherOptions::FALLBACK);
        let Some(engine) = inner.engine.as_ref() else {
            error!(resource = %resource, "dispatcher has no job queue, dropping job");
            self.metrics.queue.jobs_rejected.inc();
            return false;
        };
        let queue = Arc::clone(&engine.queue);
        let pool = engine.pool.clone();

        let waiting = queue.enqueue(job);
        self.metrics.queue.jobs_enqueued.inc();
        debug!(resource = %resource, waiting, "job enqueued");

        let size = pool.size();
        if waiting == 0 && size < options.max_threads {
            if pool.start(1) == 1 {
                inner.elastic += 1;
                self.metrics.pool.workers_added.inc();
                debug!(size = size + 1, elastic = inner.elastic, "added worker");
            }
        } else if waiting > options.high_water_mark && inner.elastic > 0 {
            pool.stop_n(1);
            inner.elastic -= 1;
            self.metrics.pool.workers_retired.inc();
            debug!(waiting, elastic = inner.elastic, "retiring worker");
        }

        self.update_gauges(&inner);
        true
    }

    /// Start the baseline workers and release anyone waiting for startup
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        self.ensure_initialized(&mut inner);

        if inner.phase == Phase::Stopped {
            warn!("dispatcher is stopped, not starting");
            return;
        }
        if inner.started {
            warn!("dispatcher already started");
            return;
        }

        // workers grown by jobs that arrived before start count toward the baseline
        let options = inner.options.unwrap_or(DispatcherOptions::FALLBACK);
        let baseline = options.initial_threads.min(options.max_threads);
        if let Some(pool) = inner.engine.as_ref().map(|e| e.pool.clone()) {
            let existing = pool.size();
            let started = pool.start(baseline.saturating_sub(existing));
            let absorbed = inner.elastic.min(baseline);
            inner.elastic -= absorbed;
            info!(workers = started, absorbed, "dispatcher started");
        }
        inner.started = true;
        self.update_gauges(&inner);
        self.initialized.notify_all();
    }

    /// Block until [`Dispatcher::start`] has run (or the dispatcher stopped)
    pub fn wait_until_started(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !inner.started && inner.phase != Phase::Stopped {
            if self.initialized.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.started
    }

    /// Stop accepting work, stop every worker and wait for them to drain.
    ///
    /// Idempotent. Jobs still queued behind the stop requests are left
    /// pending; jobs already executing run to completion.
    pub fn stop(&self) {
        let pool = {
            let mut inner = self.inner.lock();
            if inner.phase == Phase::Stopped {
                return;
            }
            inner.phase = Phase::Stopped;
            self.initialized.notify_all();
            inner.engine.as_ref().map(|e| e.pool.clone())
        };

        let Some(pool) = pool else {
            info!("dispatcher stopped before it was used");
            return;
        };

        info!(workers = pool.size(), "stopping dispatcher");
        pool.stop_all();
        if pool.wait_for_drain(self.drain_timeout) {
            info!(pending = pool.queue().pending(), "dispatcher stopped");
        } else {
            warn!(
                remaining = pool.size(),
                timeout = ?self.drain_timeout,
                "workers did not drain before timeout"
            );
        }
        self.update_gauges(&self.inner.lock());
    }

    /// True once [`Dispatcher::stop`] has been called
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().phase == Phase::Stopped
    }

    /// Live workers
    pub fn pool_size(&self) -> usize {
        self.with_engine(|e| e.pool.size())
    }

    /// Workers blocked waiting for a job
    pub fn waiting_workers(&self) -> usize {
        self.with_engine(|e| e.queue.waiting())
    }

    /// Jobs queued but not yet picked up
    pub fn pending_jobs(&self) -> usize {
        self.with_engine(|e| e.queue.pending())
    }

    /// Workers added above the baseline and not yet retired
    pub fn elastic_workers(&self) -> usize {
        self.inner.lock().elastic
    }

    fn with_engine(&self, f: impl FnOnce(&Engine) -> usize) -> usize {
        self.inner.lock().engine.as_ref().map(f).unwrap_or(0)
    }

    fn ensure_initialized(&self, inner: &mut Inner) {
        if inner.phase != Phase::Uninitialized {
            return;
        }
        if inner.options.is_none() {
            warn!(
                fallback = ?DispatcherOptions::FALLBACK,
                "dispatcher options were never set, using fallback"
            );
            inner.options = Some(DispatcherOptions::FALLBACK);
        }
        let queue = Arc::new(JobQueue::new());
        let pool = WorkerPool::new(Arc::clone(&queue));
        inner.engine = Some(Engine { queue, pool });
        inner.phase = Phase::Running;
    }

    fn update_gauges(&self, inner: &Inner) {
        if let Some(engine) = &inner.engine {
            self.metrics.pool.pool_size.set(engine.pool.size() as i64);
            self.metrics.queue.queue_depth.set(engine.queue.pending() as i64);
        }
        self.metrics.pool.elastic_workers.set(inner.elastic as i64);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // idle workers would otherwise block on the queue forever
        let inner = self.inner.get_mut();
        if inner.phase != Phase::Stopped {
            if let Some(engine) = &inner.engine {
                engine.pool.stop_all();
            }
        }
    }
}
