use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

use crate::job::{JobId, JobKind};
use crate::lifecycle::JobLifecycle;
use crate::telemetry;

use super::reporter::JobReporter;

/// Runs job bodies on their own tokio tasks.
///
/// Every scheduled body ends in exactly one terminal transition: `Ok` output
/// concludes the job, an `Err` or a panic fails it with a readable message.
/// Bodies are never cancelled.
#[derive(Clone)]
pub struct BackgroundExecutor {
    lifecycle: Arc<JobLifecycle>,
    in_flight: Arc<InFlight>,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct InFlightTicket {
    in_flight: Arc<InFlight>,
}

impl InFlightTicket {
    fn acquire(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self {
            in_flight: Arc::clone(in_flight),
        }
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}

impl std::fmt::Debug for BackgroundExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundExecutor")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl BackgroundExecutor {
    pub fn new(lifecycle: Arc<JobLifecycle>) -> Self {
        Self {
            lifecycle,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn lifecycle(&self) -> &Arc<JobLifecycle> {
        &self.lifecycle
    }

    /// Number of bodies that have been scheduled and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Create a job of `kind` and schedule `body` for it.
    pub async fn submit<F, Fut>(&self, kind: JobKind, body: F) -> anyhow::Result<JobId>
    where
        F: FnOnce(JobReporter) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let job_id = self.lifecycle.create(kind).await?;
        self.schedule(job_id, body);
        Ok(job_id)
    }

    /// Run `body` for an existing job in the background.
    ///
    /// Returns as soon as the task is spawned. The handle resolves once the
    /// terminal transition has been applied; awaiting it is optional.
    pub fn schedule<F, Fut>(&self, job_id: JobId, body: F) -> JoinHandle<()>
    where
        F: FnOnce(JobReporter) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let lifecycle = Arc::clone(&self.lifecycle);
        let ticket = InFlightTicket::acquire(&self.in_flight);

        tokio::spawn(async move {
            let _ticket = ticket;

            let kind = match lifecycle.get(job_id).await {
                Ok(record) => record.kind,
                Err(err) => {
                    tracing::error!(
                        job_id = %job_id,
                        error = %err,
                        "cannot run job body: record unavailable"
                    );
                    return;
                }
            };

            let reporter = lifecycle.reporter(job_id, kind);
            let span = telemetry::job_span(job_id.to_string(), kind.as_str());
            let _guard = telemetry::job_started(kind.as_str());

            // Inner task isolates panics from the terminal bookkeeping below.
            let body_task = tokio::spawn(async move { body(reporter).await }.instrument(span));

            let outcome = body_task.await;
            let terminal = match outcome {
                Ok(Ok(result)) => lifecycle.complete(job_id, result).await.map(|_| ()),
                Ok(Err(err)) => lifecycle.fail(job_id, format!("{err:#}")).await.map(|_| ()),
                Err(join_err) => lifecycle
                    .fail(job_id, describe_join_error(join_err))
                    .await
                    .map(|_| ()),
            };

            if let Err(err) = terminal {
                tracing::debug!(
                    job_id = %job_id,
                    error = %err,
                    "terminal transition skipped"
                );
            }
        })
    }

    /// Wait until no body is running, or until `timeout` elapses.
    ///
    /// Returns `true` when the executor went idle in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.in_flight.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    in_flight = self.in_flight(),
                    "executor drain timed out"
                );
                false
            }
        }
    }
}

pub(crate) fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("job body panicked: {}", panic_message(err.into_panic()))
    } else {
        format!("job body did not complete: {err}")
    }
}

/// Best-effort text for a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
