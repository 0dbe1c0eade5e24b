//! Metrics collection for the dispatch engine
//!
//! Counters and gauges for the queue, the worker pool and the completion
//! path. Each [`Metrics`] owns its own Prometheus registry so that several
//! engines (or several tests) can live in one process without colliding on
//! metric names.

use crate::core::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::time::Instant;

/// Queue and submission metrics
pub struct QueueMetrics {
    /// Jobs accepted into the queue
    pub jobs_enqueued: IntCounter,
    /// Jobs dropped because the dispatcher was stopped
    pub jobs_rejected: IntCounter,
    /// Real jobs currently waiting in the queue
    pub queue_depth: IntGauge,
}

/// Worker pool metrics
pub struct PoolMetrics {
    /// Live worker threads
    pub pool_size: IntGauge,
    /// Workers added above the configured baseline and not yet retired
    pub elastic_workers: IntGauge,
    /// Workers added by the elastic policy
    pub workers_added: IntCounter,
    /// Workers retired by the elastic policy
    pub workers_retired: IntCounter,
}

/// Job execution and completion metrics
pub struct JobMetrics {
    /// Executed jobs by outcome (`succeeded`, `failed`)
    pub executed: IntCounterVec,
    /// Wall-clock time of command execution in seconds
    pub duration: Histogram,
    /// State transitions committed by the notifier
    pub notifications_applied: IntCounter,
    /// Notifications dropped (vanished resource, bad state, lock failure)
    pub notifications_dropped: IntCounter,
}

/// Centralized metrics collection for all engine components
pub struct Metrics {
    registry: Registry,
    /// Queue and submission metrics
    pub queue: QueueMetrics,
    /// Worker pool metrics
    pub pool: PoolMetrics,
    /// Job execution metrics
    pub jobs: JobMetrics,
}

impl Metrics {
    /// Create new metrics instance with a private registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            queue: QueueMetrics::new(&registry)?,
            pool: PoolMetrics::new(&registry)?,
            jobs: JobMetrics::new(&registry)?,
            registry,
        })
    }

    /// The registry every metric of this instance is registered with
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Collect and return all metrics as a Prometheus-formatted string
    pub fn gather_text(&self) -> Result<String> {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        Ok(encoder.encode_to_string(&metric_families)?)
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            jobs_enqueued: counter(registry, "vmd_jobs_enqueued_total", "Jobs accepted into the queue")?,
            jobs_rejected: counter(
                registry,
                "vmd_jobs_rejected_total",
                "Jobs dropped because the dispatcher was stopped",
            )?,
            queue_depth: gauge(registry, "vmd_queue_depth", "Jobs waiting for a worker")?,
        })
    }
}

impl PoolMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            pool_size: gauge(registry, "vmd_pool_size", "Live worker threads")?,
            elastic_workers: gauge(
                registry,
                "vmd_elastic_workers",
                "Workers running above the configured baseline",
            )?,
            workers_added: counter(
                registry,
                "vmd_workers_added_total",
                "Workers added by the elastic policy",
            )?,
            workers_retired: counter(
                registry,
                "vmd_workers_retired_total",
                "Workers retired by the elastic policy",
            )?,
        })
    }
}

impl JobMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let executed = IntCounterVec::new(
            Opts::new("vmd_jobs_executed_total", "Executed jobs by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(executed.clone()))?;

        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "vmd_job_duration_seconds",
                "Duration of backend command execution in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        )?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            executed,
            duration,
            notifications_applied: counter(
                registry,
                "vmd_notifications_applied_total",
                "State transitions committed by the completion notifier",
            )?,
            notifications_dropped: counter(
                registry,
                "vmd_notifications_dropped_total",
                "Completion notifications that could not be applied",
            )?,
        })
    }

    /// Record one finished job
    pub fn record(&self, failed: bool) {
        let outcome = if failed { "failed" } else { "succeeded" };
        self.executed.with_label_values(&[outcome]).inc();
    }

    /// Number of executed jobs with the given outcome
    pub fn executed_count(&self, failed: bool) -> u64 {
        let outcome = if failed { "failed" } else { "succeeded" };
        self.executed.with_label_values(&[outcome]).get()
    }
}

/// Timer for measuring operation duration with automatic histogram recording
pub struct Timer {
    /// Start time of the operation
    start: Instant,
    /// Histogram to record the duration when finished
    histogram: Histogram,
}

impl Timer {
    /// Start a new timer
    pub fn start(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    /// Record the elapsed time and consume the timer
    pub fn finish(self) {
        let duration = self.start.elapsed();
        self.histogram.observe(duration.as_secs_f64());
    }
}
