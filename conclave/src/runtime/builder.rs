use std::fmt;
use std::sync::Arc;

use crate::config::ConclaveConfig;
use crate::events::InProcEventBus;
use crate::lifecycle::JobLifecycle;
use crate::progress::ProgressPolicy;
use crate::store::{InMemoryJobStore, JobStore};

use super::engine::Engine;

/// Builder for an [`Engine`].
///
/// Every dependency is optional: the store defaults to an
/// [`InMemoryJobStore`], the policy to [`ProgressPolicy::default`] and the
/// event bus to one sized by `config.events.capacity`.
///
/// # Example
///
/// ```ignore
/// use conclave::*;
///
/// let engine = EngineBuilder::new(ConclaveConfig::from_env()?)
///     .with_store(Arc::new(InMemoryJobStore::new()))
///     .build()?;
/// ```
pub struct EngineBuilder {
    config: ConclaveConfig,
    store: Option<Arc<dyn JobStore>>,
    policy: Option<ProgressPolicy>,
    events: Option<Arc<InProcEventBus>>,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("store_set", &self.store.is_some())
            .field("policy_set", &self.policy.is_some())
            .field("events_set", &self.events.is_some())
            .finish()
    }
}

impl EngineBuilder {
    pub fn new(config: ConclaveConfig) -> Self {
        Self {
            config,
            store: None,
            policy: None,
            events: None,
        }
    }

    /// Set the job store.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the stage-to-progress policy.
    pub fn with_policy(mut self, policy: ProgressPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the event bus.
    pub fn with_events(mut self, events: Arc<InProcEventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the [`Engine`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> anyhow::Result<Engine> {
        self.config.validate()?;

        #[cfg(feature = "metrics")]
        crate::metrics::init_metrics()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));
        let policy = Arc::new(self.policy.unwrap_or_default());
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(InProcEventBus::new(self.config.events.capacity)));

        let lifecycle = Arc::new(JobLifecycle::new(store, policy, events));
        Ok(Engine::new(self.config, lifecycle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobKind;

    #[tokio::test]
    async fn defaults_build_a_working_engine() {
        let engine = EngineBuilder::new(ConclaveConfig::default()).build().unwrap();
        assert_eq!(engine.events().capacity(), 1024);

        let job_id = engine.lifecycle().create(JobKind::Ingestion).await.unwrap();
        assert_eq!(engine.poller().get_status(job_id).await.unwrap().progress, 0);
    }

    #[tokio::test]
    async fn injected_store_is_shared_with_poller() {
        let store = Arc::new(InMemoryJobStore::new());
        let engine = EngineBuilder::new(ConclaveConfig::default())
            .with_store(store.clone())
            .build()
            .unwrap();

        let job_id = engine
            .lifecycle()
            .create(JobKind::MultiWorkerAnalysis)
            .await
            .unwrap();
        assert!(store.get(job_id).await.is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ConclaveConfig::default();
        config.events.capacity = 0;
        assert!(EngineBuilder::new(config).build().is_err());
    }
}
