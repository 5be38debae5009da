use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use uuid::Uuid;

/// Opaque, unique identifier of a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The kind of work a job performs. Each kind has its own state machine
/// shape and progress policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Ingestion,
    MultiWorkerAnalysis,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ingestion => "ingestion",
            JobKind::MultiWorkerAnalysis => "multi_worker_analysis",
        }
    }

    /// Whether a job of this kind may ever occupy `status`.
    ///
    /// Ingestion passes through `Saving`; analysis jobs go straight from
    /// `Initiated` to `Processing`.
    pub fn allows(&self, status: JobStatus) -> bool {
        match (self, status) {
            (JobKind::MultiWorkerAnalysis, JobStatus::Saving) => false,
            _ => true,
        }
    }

    /// Whether a non-terminal advance may move a job of this kind from
    /// `from` to `to`. Statuses only move forward, and ingestion jobs must
    /// pass through `Saving` before `Processing`.
    pub fn allows_step(&self, from: JobStatus, to: JobStatus) -> bool {
        if to.is_terminal() || !self.allows(to) || to.rank() < from.rank() {
            return false;
        }
        !matches!(
            (self, from, to),
            (JobKind::Ingestion, JobStatus::Initiated, JobStatus::Processing)
        )
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Initiated,
    Saving,
    Processing,
    Concluded,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Concluded | JobStatus::Error)
    }

    /// Position in the forward-only ordering of non-terminal states.
    /// Terminal states share the highest rank.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            JobStatus::Initiated => 0,
            JobStatus::Saving => 1,
            JobStatus::Processing => 2,
            JobStatus::Concluded | JobStatus::Error => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Initiated => "INITIATED",
            JobStatus::Saving => "SAVING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Concluded => "CONCLUDED",
            JobStatus::Error => "ERROR",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of a job's append-only stage history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage_label: String,
    pub progress: u8,
    pub at: DateTime<Utc>,
}

/// The stored state of a single job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub stage_label: String,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub stage_history: Vec<StageEntry>,
}

/// Stage label every job starts in.
pub const INITIAL_STAGE: &str = "initiated";

impl JobRecord {
    pub fn new(kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind,
            status: JobStatus::Initiated,
            stage_label: INITIAL_STAGE.to_string(),
            progress: 0,
            created_at: now,
            updated_at: now,
            result: None,
            error_message: None,
            stage_history: vec![StageEntry {
                stage_label: INITIAL_STAGE.to_string(),
                progress: 0,
                at: now,
            }],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Set stage and progress, stamping `updated_at` and appending history.
    pub(crate) fn record_stage(&mut self, stage_label: &str, progress: u8) {
        let now = Utc::now();
        self.stage_label = stage_label.to_string();
        self.progress = progress;
        self.updated_at = now;
        self.stage_history.push(StageEntry {
            stage_label: stage_label.to_string(),
            progress,
            at: now,
        });
    }
}

/// Identifier of a registered worker capability.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerTaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Outcome of one worker invocation inside a fan-out, owned by its job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerTask {
    pub worker_id: WorkerId,
    pub status: WorkerTaskStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl WorkerTask {
    pub fn pending(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            status: WorkerTaskStatus::Pending,
            output: None,
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn succeeded(worker_id: WorkerId, output: serde_json::Value, duration: Duration) -> Self {
        Self {
            worker_id,
            status: WorkerTaskStatus::Succeeded,
            output: Some(output),
            error: None,
            duration,
        }
    }

    pub fn failed(worker_id: WorkerId, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            worker_id,
            status: WorkerTaskStatus::Failed,
            output: None,
            error: Some(error.into()),
            duration,
        }
    }

    /// The worker's task has been spawned.
    pub fn mark_running(&mut self) {
        if self.status == WorkerTaskStatus::Pending {
            self.status = WorkerTaskStatus::Running;
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkerTaskStatus::Succeeded
    }

    /// Succeeded or failed.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            WorkerTaskStatus::Succeeded | WorkerTaskStatus::Failed
        )
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_initiated_with_history() {
        let record = JobRecord::new(JobKind::Ingestion);
        assert_eq!(record.status, JobStatus::Initiated);
        assert_eq!(record.progress, 0);
        assert_eq!(record.stage_history.len(), 1);
        assert_eq!(record.stage_history[0].stage_label, INITIAL_STAGE);
        assert!(record.result.is_none());
        assert!(record.error_message.is_none());
    }

    #[test]
    fn analysis_jobs_never_save() {
        assert!(!JobKind::MultiWorkerAnalysis.allows(JobStatus::Saving));
        assert!(JobKind::MultiWorkerAnalysis.allows(JobStatus::Processing));
        assert!(JobKind::Ingestion.allows(JobStatus::Saving));
    }

    #[test]
    fn ingestion_must_save_before_processing() {
        use JobStatus::*;
        assert!(JobKind::Ingestion.allows_step(Initiated, Saving));
        assert!(JobKind::Ingestion.allows_step(Saving, Saving));
        assert!(JobKind::Ingestion.allows_step(Saving, Processing));
        assert!(!JobKind::Ingestion.allows_step(Initiated, Processing));
        assert!(!JobKind::Ingestion.allows_step(Processing, Saving));
        assert!(!JobKind::Ingestion.allows_step(Saving, Concluded));
        assert!(JobKind::MultiWorkerAnalysis.allows_step(Initiated, Processing));
        assert!(!JobKind::MultiWorkerAnalysis.allows_step(Initiated, Saving));
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let value = serde_json::to_value(JobStatus::Concluded).unwrap();
        assert_eq!(value, serde_json::json!("CONCLUDED"));
        assert_eq!(JobStatus::Initiated.to_string(), "INITIATED");
    }

    #[test]
    fn worker_task_moves_from_pending_to_finished() {
        let mut task = WorkerTask::pending(WorkerId::new("radiology"));
        assert_eq!(task.status, WorkerTaskStatus::Pending);
        assert!(!task.is_finished());

        task.mark_running();
        assert_eq!(task.status, WorkerTaskStatus::Running);
        assert!(!task.is_finished());

        let mut done = WorkerTask::failed(WorkerId::new("radiology"), "boom", Duration::ZERO);
        done.mark_running();
        assert_eq!(done.status, WorkerTaskStatus::Failed);
        assert!(done.is_finished());
    }

    #[test]
    fn worker_task_duration_serializes_as_millis() {
        let task = WorkerTask::failed(WorkerId::new("w"), "boom", Duration::from_millis(1500));
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["duration"], serde_json::json!(1500));
        assert_eq!(value["status"], serde_json::json!("FAILED"));
    }

    #[test]
    fn job_id_parses_from_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
