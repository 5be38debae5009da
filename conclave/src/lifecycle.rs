use std::sync::Arc;

use crate::error::JobError;
use crate::events::{InProcEventBus, JobEvent, JobEventPayload};
use crate::job::{JobId, JobKind, JobRecord, JobStatus};
use crate::progress::ProgressPolicy;
use crate::runtime::JobReporter;
use crate::store::JobStore;
use crate::telemetry;

/// Stage label recorded when a job concludes.
pub const CONCLUDED_STAGE: &str = "concluded";
/// Stage label recorded when a job fails.
pub const FAILED_STAGE: &str = "failed";

const FALLBACK_FAILURE_MESSAGE: &str = "job failed without an error message";

/// Enforces the job state machine on top of a [`JobStore`].
///
/// Transitions only move forward:
///
/// ```text
/// Ingestion:            Initiated -> Saving -> Processing -> Concluded | Error
/// MultiWorkerAnalysis:  Initiated ----------> Processing -> Concluded | Error
/// ```
///
/// Which status an [`advance`](Self::advance) lands in comes from the
/// [`ProgressPolicy`] entry for the reported stage label.
pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
    policy: Arc<ProgressPolicy>,
    events: Arc<InProcEventBus>,
}

impl std::fmt::Debug for JobLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLifecycle")
            .field("policy", &self.policy)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl JobLifecycle {
    pub fn new(
        store: Arc<dyn JobStore>,
        policy: Arc<ProgressPolicy>,
        events: Arc<InProcEventBus>,
    ) -> Self {
        Self {
            store,
            policy,
            events,
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub fn policy(&self) -> &ProgressPolicy {
        &self.policy
    }

    pub fn events(&self) -> Arc<InProcEventBus> {
        Arc::clone(&self.events)
    }

    /// Reporter bound to one job, handed to its body.
    pub fn reporter(self: &Arc<Self>, job_id: JobId, kind: JobKind) -> JobReporter {
        JobReporter::new(job_id, kind, Arc::clone(self))
    }

    /// Create a job in `Initiated` with progress 0.
    pub async fn create(&self, kind: JobKind) -> anyhow::Result<JobId> {
        let job_id = self.store.create(kind).await?;
        telemetry::record_job_created(job_id.to_string(), kind.as_str());
        self.events
            .publish(JobEvent::new(job_id, JobEventPayload::Created { kind }));
        Ok(job_id)
    }

    pub async fn get(&self, job_id: JobId) -> Result<JobRecord, JobError> {
        self.store.get(job_id).await
    }

    /// Move a job to `stage_label` at `progress`.
    ///
    /// Fails with [`JobError::StaleProgress`] when `progress` is below the
    /// stored value and with [`JobError::InvalidTransition`] when the stage
    /// would move the status backwards or into a status the job kind never
    /// visits. Progress above 100 is clamped.
    pub async fn advance(
        &self,
        job_id: JobId,
        stage_label: &str,
        progress: u8,
    ) -> Result<JobRecord, JobError> {
        let policy = Arc::clone(&self.policy);
        let label = stage_label.to_string();
        let progress = progress.min(100);

        let record = self
            .store
            .mutate(
                job_id,
                Box::new(move |record: &mut JobRecord| {
                    let target = policy.status_for(record.kind, &label);
                    if !record.kind.allows_step(record.status, target) {
                        return Err(JobError::InvalidTransition {
                            job_id,
                            from: record.status,
                            to: target,
                        });
                    }
                    if progress < record.progress {
                        return Err(JobError::StaleProgress {
                            job_id,
                            current: record.progress,
                            requested: progress,
                        });
                    }
                    record.status = target;
                    record.record_stage(&label, progress);
                    Ok(())
                }),
            )
            .await?;

        tracing::debug!(
            job_id = %job_id,
            status = %record.status,
            stage = %record.stage_label,
            progress = record.progress,
            "job advanced"
        );
        self.events.publish(JobEvent::new(
            job_id,
            JobEventPayload::Advanced {
                status: record.status,
                stage_label: record.stage_label.clone(),
                progress: record.progress,
            },
        ));
        Ok(record)
    }

    /// Conclude a job with `result`, forcing progress to 100.
    pub async fn complete(
        &self,
        job_id: JobId,
        result: serde_json::Value,
    ) -> Result<JobRecord, JobError> {
        let record = self
            .store
            .mutate(
                job_id,
                Box::new(move |record: &mut JobRecord| {
                    record.record_stage(CONCLUDED_STAGE, 100);
                    record.status = JobStatus::Concluded;
                    record.result = Some(result);
                    record.error_message = None;
                    Ok(())
                }),
            )
            .await?;

        telemetry::record_job_finished(job_id.to_string(), record.kind.as_str(), "concluded");
        self.events.publish(JobEvent::new(
            job_id,
            JobEventPayload::Concluded { kind: record.kind },
        ));
        Ok(record)
    }

    /// Move a job to `Error`, freezing progress at its last value.
    pub async fn fail(
        &self,
        job_id: JobId,
        message: impl Into<String>,
    ) -> Result<JobRecord, JobError> {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = FALLBACK_FAILURE_MESSAGE.to_string();
        }
        let stored_message = message.clone();

        let record = self
            .store
            .mutate(
                job_id,
                Box::new(move |record: &mut JobRecord| {
                    let progress = record.progress;
                    record.record_stage(FAILED_STAGE, progress);
                    record.status = JobStatus::Error;
                    record.error_message = Some(stored_message);
                    record.result = None;
                    Ok(())
                }),
            )
            .await?;

        tracing::warn!(job_id = %job_id, error = %message, "job failed");
        telemetry::record_job_finished(job_id.to_string(), record.kind.as_str(), "error");
        self.events.publish(JobEvent::new(
            job_id,
            JobEventPayload::Errored {
                kind: record.kind,
                message,
            },
        ));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{analysis_stages, ingestion_stages};
    use crate::store::InMemoryJobStore;
    use serde_json::json;

    fn lifecycle() -> JobLifecycle {
        JobLifecycle::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(ProgressPolicy::default()),
            Arc::new(InProcEventBus::new(64)),
        )
    }

    #[tokio::test]
    async fn ingestion_walks_saving_then_processing() {
        let lifecycle = lifecycle();
        let job_id = lifecycle.create(JobKind::Ingestion).await.unwrap();

        let saving = lifecycle
            .advance(job_id, ingestion_stages::SAVING, 8)
            .await
            .unwrap();
        assert_eq!(saving.status, JobStatus::Saving);

        let processing = lifecycle
            .advance(job_id, ingestion_stages::OCR, 45)
            .await
            .unwrap();
        assert_eq!(processing.status, JobStatus::Processing);
        assert_eq!(processing.stage_label, ingestion_stages::OCR);
        assert_eq!(processing.stage_history.len(), 3);
    }

    #[tokio::test]
    async fn ingestion_cannot_skip_saving() {
        let lifecycle = lifecycle();
        let job_id = lifecycle.create(JobKind::Ingestion).await.unwrap();

        let err = lifecycle
            .advance(job_id, ingestion_stages::EXTRACTION, 10)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Initiated,
                to: JobStatus::Processing,
                ..
            }
        ));
        let record = lifecycle.get(job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Initiated);
        assert_eq!(record.stage_history.len(), 1);
    }

    #[tokio::test]
    async fn stale_progress_is_rejected_and_state_kept() {
        let lifecycle = lifecycle();
        let job_id = lifecycle.create(JobKind::MultiWorkerAnalysis).await.unwrap();
        lifecycle
            .advance(job_id, analysis_stages::WORKERS, 50)
            .await
            .unwrap();

        let err = lifecycle
            .advance(job_id, analysis_stages::WORKERS, 40)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::StaleProgress {
                current: 50,
                requested: 40,
                ..
            }
        ));
        assert_eq!(lifecycle.get(job_id).await.unwrap().progress, 50);
    }

    #[tokio::test]
    async fn equal_progress_is_accepted() {
        let lifecycle = lifecycle();
        let job_id = lifecycle.create(JobKind::MultiWorkerAnalysis).await.unwrap();
        lifecycle.advance(job_id, "retrieval", 10).await.unwrap();
        lifecycle.advance(job_id, "workers", 10).await.unwrap();
        assert_eq!(lifecycle.get(job_id).await.unwrap().stage_label, "workers");
    }

    #[tokio::test]
    async fn analysis_jobs_cannot_enter_saving() {
        let policy = ProgressPolicy::default().with_kind(
            JobKind::MultiWorkerAnalysis,
            crate::progress::KindPolicy::new().with_stage("upload", JobStatus::Saving, 0, 5),
        );
        let lifecycle = JobLifecycle::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(policy),
            Arc::new(InProcEventBus::new(8)),
        );
        let job_id = lifecycle.create(JobKind::MultiWorkerAnalysis).await.unwrap();

        let err = lifecycle.advance(job_id, "upload", 1).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                to: JobStatus::Saving,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn status_never_moves_backwards() {
        let lifecycle = lifecycle();
        let job_id = lifecycle.create(JobKind::Ingestion).await.unwrap();
        lifecycle
            .advance(job_id, ingestion_stages::SAVING, 10)
            .await
            .unwrap();
        lifecycle
            .advance(job_id, ingestion_stages::EXTRACTION, 20)
            .await
            .unwrap();

        let err = lifecycle
            .advance(job_id, ingestion_stages::SAVING, 25)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        assert_eq!(
            lifecycle.get(job_id).await.unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn complete_forces_full_progress() {
        let lifecycle = lifecycle();
        let job_id = lifecycle.create(JobKind::Ingestion).await.unwrap();
        lifecycle.advance(job_id, "saving", 5).await.unwrap();

        let record = lifecycle
            .complete(job_id, json!({"document_id": "doc-1"}))
            .await
            .unwrap();
        assert_eq!(record.status, JobStatus::Concluded);
        assert_eq!(record.progress, 100);
        assert_eq!(record.result, Some(json!({"document_id": "doc-1"})));
    }

    #[tokio::test]
    async fn fail_freezes_progress_and_keeps_message() {
        let lifecycle = lifecycle();
        let job_id = lifecycle.create(JobKind::MultiWorkerAnalysis).await.unwrap();
        lifecycle.advance(job_id, "workers", 37).await.unwrap();

        let record = lifecycle
            .fail(job_id, "retrieval backend unavailable")
            .await
            .unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.progress, 37);
        assert_eq!(
            record.error_message.as_deref(),
            Some("retrieval backend unavailable")
        );
    }

    #[tokio::test]
    async fn blank_failure_message_gets_fallback() {
        let lifecycle = lifecycle();
        let job_id = lifecycle.create(JobKind::Ingestion).await.unwrap();
        let record = lifecycle.fail(job_id, "   ").await.unwrap();
        assert_eq!(
            record.error_message.as_deref(),
            Some(FALLBACK_FAILURE_MESSAGE)
        );
    }

    #[tokio::test]
    async fn terminal_jobs_are_immutable() {
        let lifecycle = lifecycle();
        let job_id = lifecycle.create(JobKind::Ingestion).await.unwrap();
        lifecycle.complete(job_id, json!("done")).await.unwrap();

        assert!(matches!(
            lifecycle.advance(job_id, "ocr", 100).await,
            Err(JobError::Terminal { .. })
        ));
        assert!(matches!(
            lifecycle.fail(job_id, "late").await,
            Err(JobError::Terminal { .. })
        ));
        assert!(matches!(
            lifecycle.complete(job_id, json!("again")).await,
            Err(JobError::Terminal { .. })
        ));

        let record = lifecycle.get(job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Concluded);
        assert_eq!(record.result, Some(json!("done")));
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn transitions_publish_events() {
        let lifecycle = lifecycle();
        let mut rx = lifecycle.events().subscribe();

        let job_id = lifecycle.create(JobKind::Ingestion).await.unwrap();
        lifecycle.advance(job_id, "saving", 3).await.unwrap();
        lifecycle.fail(job_id, "disk full").await.unwrap();

        let created = rx.recv().await.unwrap();
        assert!(matches!(created.payload, JobEventPayload::Created { .. }));
        let advanced = rx.recv().await.unwrap();
        assert!(matches!(
            advanced.payload,
            JobEventPayload::Advanced {
                status: JobStatus::Saving,
                progress: 3,
                ..
            }
        ));
        let errored = rx.recv().await.unwrap();
        assert_eq!(errored.meta.job_id, job_id);
        assert!(matches!(errored.payload, JobEventPayload::Errored { .. }));
    }
}
