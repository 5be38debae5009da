use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::AnalysisContext;
use crate::error::JobError;
use crate::job::WorkerId;

/// A specialist invoked once per analysis job.
///
/// Implementations own their domain logic. An `Err` is recorded against the
/// worker and never fails the job on its own.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, context: &AnalysisContext) -> anyhow::Result<Value>;
}

/// A registered worker together with its id.
#[derive(Clone)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub worker: Arc<dyn Worker>,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle").field("id", &self.id).finish()
    }
}

/// Ordered set of workers. Registration order is the order results are
/// returned in.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: Vec<WorkerHandle>,
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.workers.iter().map(|w| w.id.as_str()))
            .finish()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker. Ids must be unique.
    pub fn register(
        &mut self,
        id: impl Into<WorkerId>,
        worker: Arc<dyn Worker>,
    ) -> anyhow::Result<()> {
        let id = id.into();
        if self.get(&id).is_some() {
            anyhow::bail!("worker {id} is already registered");
        }
        tracing::debug!(worker_id = %id, "worker registered");
        self.workers.push(WorkerHandle { id, worker });
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_worker(
        mut self,
        id: impl Into<WorkerId>,
        worker: Arc<dyn Worker>,
    ) -> anyhow::Result<Self> {
        self.register(id, worker)?;
        Ok(self)
    }

    pub fn get(&self, id: &WorkerId) -> Option<&WorkerHandle> {
        self.workers.iter().find(|w| &w.id == id)
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id.clone()).collect()
    }

    pub fn all(&self) -> Vec<WorkerHandle> {
        self.workers.clone()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Resolve `ids` in the order given. An empty slice selects every
    /// registered worker.
    pub fn select(&self, ids: &[WorkerId]) -> Result<Vec<WorkerHandle>, JobError> {
        if ids.is_empty() {
            return Ok(self.all());
        }

        let mut selected = Vec::with_capacity(ids.len());
        for id in ids {
            if selected.iter().any(|w: &WorkerHandle| &w.id == id) {
                return Err(JobError::validation(format!("worker {id} requested twice")));
            }
            let handle = self
                .get(id)
                .ok_or_else(|| JobError::validation(format!("unknown worker {id}")))?;
            selected.push(handle.clone());
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Worker for Echo {
        async fn invoke(&self, context: &AnalysisContext) -> anyhow::Result<Value> {
            Ok(Value::String(context.query.clone()))
        }
    }

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new()
            .with_worker("cardiology", Arc::new(Echo))
            .unwrap()
            .with_worker("neurology", Arc::new(Echo))
            .unwrap()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry();
        assert!(registry.register("cardiology", Arc::new(Echo)).is_err());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn empty_selection_returns_all_in_order() {
        let ids: Vec<_> = registry()
            .select(&[])
            .unwrap()
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(ids, vec![WorkerId::new("cardiology"), WorkerId::new("neurology")]);
    }

    #[test]
    fn selection_keeps_requested_order() {
        let selected = registry()
            .select(&[WorkerId::new("neurology"), WorkerId::new("cardiology")])
            .unwrap();
        assert_eq!(selected[0].id.as_str(), "neurology");
        assert_eq!(selected[1].id.as_str(), "cardiology");
    }

    #[test]
    fn unknown_or_repeated_worker_is_validation_error() {
        let registry = registry();
        assert!(matches!(
            registry.select(&[WorkerId::new("dermatology")]),
            Err(JobError::Validation(_))
        ));
        assert!(matches!(
            registry.select(&[WorkerId::new("neurology"), WorkerId::new("neurology")]),
            Err(JobError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn registered_worker_is_invocable() {
        let registry = registry();
        let handle = registry.get(&WorkerId::new("cardiology")).unwrap();
        let output = handle
            .worker
            .invoke(&AnalysisContext::new("palpitations"))
            .await
            .unwrap();
        assert_eq!(output, Value::String("palpitations".into()));
    }
}
