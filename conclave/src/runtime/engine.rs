use std::sync::Arc;

use axum::Router;

use crate::compiler::{ResultCompiler, Synthesizer};
use crate::config::ConclaveConfig;
use crate::context::ContextRetriever;
use crate::events::InProcEventBus;
use crate::fanout::FanOutCoordinator;
use crate::http;
use crate::lifecycle::JobLifecycle;
use crate::pipeline::{
    AnalysisPipeline, AnalysisService, IngestionPipeline, IngestionService, JobSubmitter,
};
use crate::poller::JobPoller;
use crate::registry::WorkerRegistry;

use super::executor::BackgroundExecutor;

/// The assembled job runtime: one store, one lifecycle manager, one
/// executor, shared by every job kind in the process.
///
/// Build it with [`EngineBuilder`](super::EngineBuilder).
#[derive(Clone)]
pub struct Engine {
    config: ConclaveConfig,
    lifecycle: Arc<JobLifecycle>,
    executor: BackgroundExecutor,
    poller: JobPoller,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub(crate) fn new(config: ConclaveConfig, lifecycle: Arc<JobLifecycle>) -> Self {
        let executor = BackgroundExecutor::new(Arc::clone(&lifecycle));
        let poller = JobPoller::new(lifecycle.store());
        Self {
            config,
            lifecycle,
            executor,
            poller,
        }
    }

    pub fn config(&self) -> &ConclaveConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<JobLifecycle> {
        &self.lifecycle
    }

    pub fn executor(&self) -> &BackgroundExecutor {
        &self.executor
    }

    pub fn poller(&self) -> &JobPoller {
        &self.poller
    }

    pub fn events(&self) -> Arc<InProcEventBus> {
        self.lifecycle.events()
    }

    /// Submission service for multi-worker analysis jobs, using the
    /// configured worker timeout and probability tolerance.
    pub fn analysis_service(
        &self,
        retriever: Arc<dyn ContextRetriever>,
        registry: WorkerRegistry,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> AnalysisService {
        let pipeline = AnalysisPipeline::new(
            retriever,
            Arc::new(registry),
            FanOutCoordinator::new(&self.config.fanout),
            ResultCompiler::new(synthesizer, &self.config.compiler),
        );
        AnalysisService::new(self.executor.clone(), Arc::new(pipeline))
    }

    /// Submission service for ingestion jobs. Fails when a stage label has
    /// no range in the progress policy.
    pub fn ingestion_service(
        &self,
        pipeline: IngestionPipeline,
    ) -> anyhow::Result<IngestionService> {
        pipeline.validate(self.lifecycle.policy())?;
        Ok(IngestionService::new(
            self.executor.clone(),
            Arc::new(pipeline),
        ))
    }

    /// HTTP polling triad driving `submitter`.
    pub fn routes(&self, submitter: Arc<dyn JobSubmitter>) -> Router {
        http::job_routes(self.poller.clone(), submitter)
    }

    /// Wait for running job bodies, up to the configured drain timeout.
    pub async fn shutdown(&self) -> bool {
        tracing::info!(in_flight = self.executor.in_flight(), "draining job executor");
        let drained = self
            .executor
            .drain(self.config.executor.drain_timeout())
            .await;
        if drained {
            tracing::info!("job executor drained");
        }
        drained
    }
}
