use thiserror::Error;

use crate::job::{JobId, JobStatus};

/// Errors surfaced by the job store, lifecycle manager and polling facade.
///
/// Worker failures never appear here: they are recorded as
/// [`WorkerTask`](crate::job::WorkerTask) data. Collaborator and job-body
/// failures travel as `anyhow::Error` until the executor turns them into
/// a failed job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Request rejected before any job was created.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("job {0} not found")]
    NotFound(JobId),

    /// Result requested while the job is still running.
    #[error("job {job_id} is not ready (status {status})")]
    NotReady { job_id: JobId, status: JobStatus },

    /// The job ended in `ERROR`; carries its stored message.
    #[error("job {job_id} failed: {message}")]
    Failed { job_id: JobId, message: String },

    #[error("stale progress for job {job_id}: {requested} < {current}")]
    StaleProgress {
        job_id: JobId,
        current: u8,
        requested: u8,
    },

    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// Mutation attempted on a job that already reached a terminal state.
    #[error("job {job_id} is terminal ({status})")]
    Terminal { job_id: JobId, status: JobStatus },

    /// Store or collaborator failure outside the job state machine.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl JobError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
