//! Prometheus metrics for conclave.
//!
//! Compiled only with the `metrics` feature. The [`telemetry`](crate::telemetry)
//! helpers forward here, so call sites never need their own `cfg` gates.
//!
//! # Metrics
//!
//! ## Counters
//! - `conclave_jobs_created_total` - Jobs created, by kind
//! - `conclave_jobs_finished_total` - Jobs reaching a terminal status
//! - `conclave_worker_invocations_total` - Fan-out worker outcomes
//! - `conclave_stale_progress_total` - Rejected progress reports
//!
//! ## Gauges
//! - `conclave_jobs_in_flight` - Job bodies currently running
//!
//! ## Histograms
//! - `conclave_worker_duration_seconds` - Worker invocation latency
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, GaugeVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Registry holding every conclave collector.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `job_kind`.
pub static JOBS_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("conclave_jobs_created_total", "Total number of jobs created");
    CounterVec::new(opts, &["job_kind"])
        .expect("conclave_jobs_created_total metric creation failed")
});

/// Labels: `job_kind`, `status` (`concluded` or `error`).
pub static JOBS_FINISHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "conclave_jobs_finished_total",
        "Total number of jobs reaching a terminal status",
    );
    CounterVec::new(opts, &["job_kind", "status"])
        .expect("conclave_jobs_finished_total metric creation failed")
});

/// Labels: `worker_id`, `status` (`succeeded` or `failed`).
pub static WORKER_INVOCATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "conclave_worker_invocations_total",
        "Total number of fan-out worker invocations",
    );
    CounterVec::new(opts, &["worker_id", "status"])
        .expect("conclave_worker_invocations_total metric creation failed")
});

/// Labels: `job_kind`.
pub static STALE_PROGRESS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "conclave_stale_progress_total",
        "Total number of rejected progress reports",
    );
    CounterVec::new(opts, &["job_kind"])
        .expect("conclave_stale_progress_total metric creation failed")
});

/// Labels: `job_kind`.
pub static JOBS_IN_FLIGHT: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("conclave_jobs_in_flight", "Job bodies currently executing");
    GaugeVec::new(opts, &["job_kind"]).expect("conclave_jobs_in_flight metric creation failed")
});

/// Labels: `worker_id`, `status`.
pub static WORKER_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.005, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "conclave_worker_duration_seconds",
        "Worker invocation duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["worker_id", "status"])
        .expect("conclave_worker_duration_seconds metric creation failed")
});

/// Register every collector with [`REGISTRY`]. Safe to call repeatedly.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_CREATED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_FINISHED_TOTAL.clone()),
        Box::new(WORKER_INVOCATIONS_TOTAL.clone()),
        Box::new(STALE_PROGRESS_TOTAL.clone()),
        Box::new(JOBS_IN_FLIGHT.clone()),
        Box::new(WORKER_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_created(job_kind: &str) {
    JOBS_CREATED_TOTAL.with_label_values(&[job_kind]).inc();
}

pub fn record_job_finished(job_kind: &str, status: &str) {
    JOBS_FINISHED_TOTAL.with_label_values(&[job_kind, status]).inc();
}

pub fn record_worker_finished(worker_id: &str, status: &str, duration_secs: f64) {
    WORKER_INVOCATIONS_TOTAL
        .with_label_values(&[worker_id, status])
        .inc();
    WORKER_DURATION_SECONDS
        .with_label_values(&[worker_id, status])
        .observe(duration_secs);
}

pub fn record_stale_progress(job_kind: &str) {
    STALE_PROGRESS_TOTAL.with_label_values(&[job_kind]).inc();
}

pub fn adjust_in_flight(job_kind: &str, delta: f64) {
    JOBS_IN_FLIGHT.with_label_values(&[job_kind]).add(delta);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
