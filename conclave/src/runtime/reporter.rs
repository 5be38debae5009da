use std::fmt;
use std::sync::Arc;

use crate::error::JobError;
use crate::events::{JobEvent, JobEventPayload};
use crate::job::{JobId, JobKind, WorkerTask, WorkerTaskStatus};
use crate::lifecycle::JobLifecycle;
use crate::progress::ProgressRange;
use crate::telemetry;

/// Progress handle bound to a single job.
///
/// Job bodies and the fan-out coordinator report through this value instead
/// of touching the store. Rejected reports are logged and swallowed: a stale
/// or late report never aborts the body that made it.
#[derive(Clone)]
pub struct JobReporter {
    job_id: JobId,
    kind: JobKind,
    lifecycle: Arc<JobLifecycle>,
}

impl fmt::Debug for JobReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobReporter")
            .field("job_id", &self.job_id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl JobReporter {
    pub(crate) fn new(job_id: JobId, kind: JobKind, lifecycle: Arc<JobLifecycle>) -> Self {
        Self {
            job_id,
            kind,
            lifecycle,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Progress slice the policy reserves for `stage_label`.
    pub fn range(&self, stage_label: &str) -> ProgressRange {
        self.lifecycle.policy().range(self.kind, stage_label)
    }

    /// Report `stage_label` at `progress`. Returns whether the report was
    /// applied.
    pub async fn advance(&self, stage_label: &str, progress: u8) -> bool {
        match self
            .lifecycle
            .advance(self.job_id, stage_label, progress)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                self.log_rejection(err);
                false
            }
        }
    }

    /// Report the start of `stage_label` at the bottom of its range.
    pub async fn enter_stage(&self, stage_label: &str) -> bool {
        let progress = self.range(stage_label).lo;
        self.advance(stage_label, progress).await
    }

    /// Report `fraction` (0.0–1.0) of `stage_label` as done.
    pub async fn stage_progress(&self, stage_label: &str, fraction: f64) -> bool {
        let progress = self.range(stage_label).at(fraction);
        self.advance(stage_label, progress).await
    }

    /// Report the end of `stage_label` at the top of its range.
    pub async fn finish_stage(&self, stage_label: &str) -> bool {
        let progress = self.range(stage_label).hi;
        self.advance(stage_label, progress).await
    }

    /// Conclude the job early. The executor's own terminal transition then
    /// becomes a no-op.
    pub async fn complete(&self, result: serde_json::Value) -> bool {
        match self.lifecycle.complete(self.job_id, result).await {
            Ok(_) => true,
            Err(err) => {
                self.log_rejection(err);
                false
            }
        }
    }

    /// Fail the job early.
    pub async fn fail(&self, message: impl Into<String>) -> bool {
        match self.lifecycle.fail(self.job_id, message).await {
            Ok(_) => true,
            Err(err) => {
                self.log_rejection(err);
                false
            }
        }
    }

    /// Publish the outcome of one fan-out worker.
    pub fn worker_finished(&self, task: &WorkerTask) {
        let status = match task.status {
            WorkerTaskStatus::Succeeded => "succeeded",
            WorkerTaskStatus::Failed => "failed",
            WorkerTaskStatus::Pending => "pending",
            WorkerTaskStatus::Running => "running",
        };
        telemetry::record_worker_finished(
            task.worker_id.as_str(),
            status,
            task.duration.as_secs_f64(),
        );
        if let Some(error) = &task.error {
            tracing::warn!(
                job_id = %self.job_id,
                worker_id = %task.worker_id,
                error = %error,
                "worker failed"
            );
        }
        self.lifecycle.events().publish(JobEvent::new(
            self.job_id,
            JobEventPayload::WorkerFinished {
                worker_id: task.worker_id.clone(),
                status: task.status,
                duration_ms: task.duration.as_millis() as u64,
            },
        ));
    }

    fn log_rejection(&self, err: JobError) {
        match err {
            JobError::StaleProgress {
                current, requested, ..
            } => telemetry::record_stale_progress(
                self.job_id.to_string(),
                self.kind.as_str(),
                current,
                requested,
            ),
            JobError::Terminal { status, .. } => tracing::debug!(
                job_id = %self.job_id,
                status = %status,
                "report ignored: job already terminal"
            ),
            other => tracing::warn!(
                job_id = %self.job_id,
                error = %other,
                "report rejected"
            ),
        }
    }
}
