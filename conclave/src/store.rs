use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::JobError;
use crate::job::{JobId, JobKind, JobRecord};

/// Mutation applied to a copy of a stored record. Returning an error
/// discards the copy and leaves the stored record untouched.
pub type RecordMutation = Box<dyn FnOnce(&mut JobRecord) -> Result<(), JobError> + Send>;

/// Keyed registry of job records.
///
/// The process owns exactly one store, created at startup and shared through
/// an `Arc`. Implementors decide durability; the lifecycle manager only relies
/// on the contract below.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a fresh record in `Initiated` and return its id.
    async fn create(&self, kind: JobKind) -> anyhow::Result<JobId>;

    /// Fetch a snapshot of a record.
    async fn get(&self, job_id: JobId) -> Result<JobRecord, JobError>;

    /// Atomically apply `mutation` and persist the result.
    ///
    /// Rejected without side effects when the record is absent
    /// ([`JobError::NotFound`]), already terminal ([`JobError::Terminal`]),
    /// or when the mutation itself returns an error.
    async fn mutate(&self, job_id: JobId, mutation: RecordMutation) -> Result<JobRecord, JobError>;

    /// Drop a record. Retention policy belongs to the integrator.
    async fn remove(&self, job_id: JobId) -> Option<JobRecord>;

    /// Ids of every stored record.
    async fn ids(&self) -> Vec<JobId>;

    /// Number of stored records.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Process-local [`JobStore`] keeping every record in memory.
///
/// A single `RwLock` guards the map and is held only for the in-memory
/// update itself, never across an await point. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    records: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl std::fmt::Debug for InMemoryJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("InMemoryJobStore");
        match self.records.try_read() {
            Some(records) => {
                debug.field("records", &records.len());
            }
            None => {
                debug.field("records", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, kind: JobKind) -> anyhow::Result<JobId> {
        let record = JobRecord::new(kind);
        let job_id = record.id;
        let mut records = self.records.write();
        if records.contains_key(&job_id) {
            anyhow::bail!("job id collision: {job_id}");
        }
        records.insert(job_id, record);
        Ok(job_id)
    }

    async fn get(&self, job_id: JobId) -> Result<JobRecord, JobError> {
        self.records
            .read()
            .get(&job_id)
            .cloned()
            .ok_or(JobError::NotFound(job_id))
    }

    async fn mutate(&self, job_id: JobId, mutation: RecordMutation) -> Result<JobRecord, JobError> {
        let mut records = self.records.write();
        let Some(stored) = records.get_mut(&job_id) else {
            tracing::warn!(job_id = %job_id, "mutation rejected: job not found");
            return Err(JobError::NotFound(job_id));
        };

        if stored.is_terminal() {
            tracing::debug!(
                job_id = %job_id,
                status = %stored.status,
                "mutation rejected: job is terminal"
            );
            return Err(JobError::Terminal {
                job_id,
                status: stored.status,
            });
        }

        let mut draft = stored.clone();
        mutation(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }

    async fn remove(&self, job_id: JobId) -> Option<JobRecord> {
        self.records.write().remove(&job_id)
    }

    async fn ids(&self) -> Vec<JobId> {
        self.records.read().keys().copied().collect()
    }

    async fn len(&self) -> usize {
        self.records.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    #[tokio::test]
    async fn create_then_get_returns_initiated_record() {
        let store = InMemoryJobStore::new();
        let job_id = store.create(JobKind::MultiWorkerAnalysis).await.unwrap();

        let record = store.get(job_id).await.unwrap();
        assert_eq!(record.id, job_id);
        assert_eq!(record.status, JobStatus::Initiated);
        assert_eq!(record.progress, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn get_unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let missing = JobId::new();
        assert!(matches!(
            store.get(missing).await,
            Err(JobError::NotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn mutate_commits_only_on_success() {
        let store = InMemoryJobStore::new();
        let job_id = store.create(JobKind::Ingestion).await.unwrap();

        let updated = store
            .mutate(
                job_id,
                Box::new(|record: &mut JobRecord| {
                    record.progress = 10;
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.progress, 10);

        let rejected = store
            .mutate(
                job_id,
                Box::new(move |record: &mut JobRecord| {
                    record.progress = 99;
                    Err(JobError::StaleProgress {
                        job_id,
                        current: 10,
                        requested: 5,
                    })
                }),
            )
            .await;
        assert!(rejected.is_err());
        assert_eq!(store.get(job_id).await.unwrap().progress, 10);
    }

    #[tokio::test]
    async fn mutate_rejects_terminal_records() {
        let store = InMemoryJobStore::new();
        let job_id = store.create(JobKind::Ingestion).await.unwrap();
        store
            .mutate(
                job_id,
                Box::new(|record: &mut JobRecord| {
                    record.status = JobStatus::Concluded;
                    record.progress = 100;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let result = store
            .mutate(
                job_id,
                Box::new(|record: &mut JobRecord| {
                    record.progress = 1;
                    Ok(())
                }),
            )
            .await;
        assert!(matches!(result, Err(JobError::Terminal { .. })));
        assert_eq!(store.get(job_id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn mutate_missing_record_is_not_found() {
        let store = InMemoryJobStore::new();
        let result = store.mutate(JobId::new(), Box::new(|_: &mut JobRecord| Ok(()))).await;
        assert!(matches!(result, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn remove_drops_record() {
        let store = InMemoryJobStore::new();
        let job_id = store.create(JobKind::Ingestion).await.unwrap();
        assert!(store.remove(job_id).await.is_some());
        assert!(store.is_empty().await);
        assert!(store.ids().await.is_empty());
    }
}
