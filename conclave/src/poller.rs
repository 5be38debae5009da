use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;
use crate::job::{JobId, JobKind, JobRecord, JobStatus, StageEntry};
use crate::store::JobStore;

/// Status snapshot returned to polling clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub stage_label: String,
    pub progress: u8,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobStatusView {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            kind: record.kind,
            status: record.status,
            stage_label: record.stage_label.clone(),
            progress: record.progress,
            updated_at: record.updated_at,
        }
    }
}

/// Read-only query surface over the job store.
///
/// A poller [`scoped`](Self::scoped) to one kind reports jobs of any other
/// kind as [`JobError::NotFound`].
#[derive(Clone)]
pub struct JobPoller {
    store: Arc<dyn JobStore>,
    kind: Option<JobKind>,
}

impl std::fmt::Debug for JobPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPoller")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl JobPoller {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store, kind: None }
    }

    /// A poller over the same store that only sees jobs of `kind`.
    pub fn scoped(&self, kind: JobKind) -> Self {
        Self {
            store: Arc::clone(&self.store),
            kind: Some(kind),
        }
    }

    pub fn kind(&self) -> Option<JobKind> {
        self.kind
    }

    async fn fetch(&self, job_id: JobId) -> Result<JobRecord, JobError> {
        let record = self.store.get(job_id).await?;
        match self.kind {
            Some(kind) if kind != record.kind => Err(JobError::NotFound(job_id)),
            _ => Ok(record),
        }
    }

    pub async fn get_status(&self, job_id: JobId) -> Result<JobStatusView, JobError> {
        let record = self.fetch(job_id).await?;
        Ok(JobStatusView::from(&record))
    }

    /// The stored result of a concluded job.
    ///
    /// [`JobError::NotReady`] while the job runs, [`JobError::Failed`] with
    /// the stored message once it has failed.
    pub async fn get_result(&self, job_id: JobId) -> Result<Value, JobError> {
        let record = self.fetch(job_id).await?;
        match record.status {
            JobStatus::Concluded => Ok(record.result.unwrap_or(Value::Null)),
            JobStatus::Error => Err(JobError::Failed {
                job_id,
                message: record.error_message.unwrap_or_default(),
            }),
            status => Err(JobError::NotReady { job_id, status }),
        }
    }

    /// [`get_result`](Self::get_result) decoded into `T`.
    pub async fn get_result_as<T: DeserializeOwned>(&self, job_id: JobId) -> Result<T, JobError> {
        let value = self.get_result(job_id).await?;
        serde_json::from_value(value).map_err(|err| {
            JobError::Internal(anyhow::Error::new(err).context(format!(
                "result of job {job_id} does not match the requested type"
            )))
        })
    }

    /// Every stage the job has passed through, oldest first.
    pub async fn history(&self, job_id: JobId) -> Result<Vec<StageEntry>, JobError> {
        Ok(self.fetch(job_id).await?.stage_history)
    }

    /// Full record snapshot.
    pub async fn get_record(&self, job_id: JobId) -> Result<JobRecord, JobError> {
        self.fetch(job_id).await
    }
}
