//! Tracing spans and metric hooks for the job lifecycle.
//!
//! Every helper logs through `tracing` and, when the `metrics` feature is
//! enabled, also updates the Prometheus collectors in [`crate::metrics`].

use tracing::{info_span, Span};

/// Span covering one job body from start to terminal transition.
#[must_use]
pub fn job_span(job_id: impl AsRef<str>, job_kind: impl AsRef<str>) -> Span {
    info_span!(
        "conclave.job",
        job_id = %job_id.as_ref(),
        job_kind = %job_kind.as_ref(),
    )
}

/// Span covering a whole fan-out round.
#[must_use]
pub fn fanout_span(job_id: impl AsRef<str>, workers: usize) -> Span {
    info_span!(
        "conclave.fanout",
        job_id = %job_id.as_ref(),
        workers = workers,
    )
}

/// Span covering a single worker invocation.
#[must_use]
pub fn worker_span(job_id: impl AsRef<str>, worker_id: impl AsRef<str>) -> Span {
    info_span!(
        "conclave.worker",
        job_id = %job_id.as_ref(),
        worker_id = %worker_id.as_ref(),
    )
}

pub fn record_job_created(job_id: impl AsRef<str>, job_kind: impl AsRef<str>) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        job_kind = %job_kind.as_ref(),
        "job created"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_created(job_kind.as_ref());
}

/// `status` is the terminal status label (`concluded` or `error`).
pub fn record_job_finished(
    job_id: impl AsRef<str>,
    job_kind: impl AsRef<str>,
    status: impl AsRef<str>,
) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        job_kind = %job_kind.as_ref(),
        status = %status.as_ref(),
        "job finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_finished(job_kind.as_ref(), status.as_ref());
}

pub fn record_worker_finished(
    worker_id: impl AsRef<str>,
    status: impl AsRef<str>,
    duration_secs: f64,
) {
    tracing::debug!(
        worker_id = %worker_id.as_ref(),
        status = %status.as_ref(),
        duration_secs = duration_secs,
        "worker finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_worker_finished(worker_id.as_ref(), status.as_ref(), duration_secs);
}

pub fn record_stale_progress(
    job_id: impl AsRef<str>,
    job_kind: impl AsRef<str>,
    current: u8,
    requested: u8,
) {
    tracing::warn!(
        job_id = %job_id.as_ref(),
        job_kind = %job_kind.as_ref(),
        current = current,
        requested = requested,
        "stale progress report ignored"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_stale_progress(job_kind.as_ref());
}

/// Track a running job body. The returned guard decrements the in-flight
/// gauge when dropped.
pub fn job_started(job_kind: impl AsRef<str>) -> InFlightGuard {
    #[cfg(feature = "metrics")]
    crate::metrics::adjust_in_flight(job_kind.as_ref(), 1.0);

    InFlightGuard {
        job_kind: job_kind.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    job_kind: String,
    start: std::time::Instant,
}

impl InFlightGuard {
    #[must_use]
    pub fn job_kind(&self) -> &str {
        &self.job_kind
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        #[cfg(feature = "metrics")]
        crate::metrics::adjust_in_flight(&self.job_kind, -1.0);
    }
}
