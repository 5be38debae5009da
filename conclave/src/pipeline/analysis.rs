use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compiler::{FinalResult, ResultCompiler};
use crate::context::{AnalysisContext, ContextRetriever, ScopeFilter};
use crate::error::JobError;
use crate::fanout::FanOutCoordinator;
use crate::job::{JobId, JobKind, WorkerId};
use crate::progress::analysis_stages::{RETRIEVAL, SYNTHESIS, WORKERS};
use crate::registry::{WorkerHandle, WorkerRegistry};
use crate::runtime::{BackgroundExecutor, JobReporter};

use super::{decode_request, JobSubmitter};

/// Body of `POST /jobs` for multi-worker analysis.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub query: String,
    /// Workers to consult, in order. Empty means every registered worker.
    #[serde(default)]
    pub workers: Vec<WorkerId>,
    #[serde(default)]
    pub scope: Option<ScopeFilter>,
    /// Overrides the configured per-worker timeout for this job.
    #[serde(default)]
    pub worker_timeout_ms: Option<u64>,
    #[serde(default)]
    pub parameters: Value,
}

impl AnalysisRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_workers<I, W>(mut self, workers: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: Into<WorkerId>,
    {
        self.workers = workers.into_iter().map(Into::into).collect();
        self
    }
}

/// A validated request, ready to run.
#[derive(Clone, Debug)]
pub struct AnalysisPlan {
    pub query: String,
    pub scope: Option<ScopeFilter>,
    pub parameters: Value,
    pub workers: Vec<WorkerHandle>,
    pub worker_timeout: Option<Duration>,
}

/// Retrieval, fan-out and synthesis for one analysis job.
#[derive(Clone)]
pub struct AnalysisPipeline {
    retriever: Arc<dyn ContextRetriever>,
    registry: Arc<WorkerRegistry>,
    fanout: FanOutCoordinator,
    compiler: ResultCompiler,
}

impl std::fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("registry", &self.registry)
            .field("fanout", &self.fanout)
            .field("compiler", &self.compiler)
            .finish_non_exhaustive()
    }
}

impl AnalysisPipeline {
    pub fn new(
        retriever: Arc<dyn ContextRetriever>,
        registry: Arc<WorkerRegistry>,
        fanout: FanOutCoordinator,
        compiler: ResultCompiler,
    ) -> Self {
        Self {
            retriever,
            registry,
            fanout,
            compiler,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Validate `request` against the registry without touching the store.
    pub fn prepare(&self, request: AnalysisRequest) -> Result<AnalysisPlan, JobError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(JobError::validation("query must not be empty"));
        }
        if request.worker_timeout_ms == Some(0) {
            return Err(JobError::validation("worker_timeout_ms must be greater than zero"));
        }

        let workers = self.registry.select(&request.workers)?;
        if workers.is_empty() {
            tracing::warn!("analysis requested with no registered workers");
        }

        Ok(AnalysisPlan {
            query: query.to_string(),
            scope: request.scope.filter(|scope| !scope.is_empty()),
            parameters: request.parameters,
            workers,
            worker_timeout: request.worker_timeout_ms.map(Duration::from_millis),
        })
    }

    /// Run a prepared plan to a [`FinalResult`].
    ///
    /// Retrieval and synthesis failures are returned as errors and fail the
    /// job. Worker failures end up inside the result.
    pub async fn run(
        &self,
        reporter: &JobReporter,
        plan: AnalysisPlan,
    ) -> anyhow::Result<FinalResult> {
        reporter.enter_stage(RETRIEVAL).await;
        let snippets = self
            .retriever
            .retrieve(&plan.query, plan.scope.as_ref())
            .await
            .context("context retrieval failed")?;
        tracing::info!(snippets = snippets.len(), "context retrieved");
        reporter.finish_stage(RETRIEVAL).await;

        let context = Arc::new(AnalysisContext {
            query: plan.query,
            scope: plan.scope,
            snippets,
            parameters: plan.parameters,
        });

        let tasks = self
            .fanout
            .run_stage(
                reporter,
                WORKERS,
                &plan.workers,
                Arc::clone(&context),
                plan.worker_timeout,
            )
            .await;

        reporter.enter_stage(SYNTHESIS).await;
        self.compiler
            .compile(&context, tasks)
            .await
            .context("result synthesis failed")
    }
}

/// [`JobSubmitter`] for [`JobKind::MultiWorkerAnalysis`].
#[derive(Clone, Debug)]
pub struct AnalysisService {
    executor: BackgroundExecutor,
    pipeline: Arc<AnalysisPipeline>,
}

impl AnalysisService {
    pub fn new(executor: BackgroundExecutor, pipeline: Arc<AnalysisPipeline>) -> Self {
        Self { executor, pipeline }
    }

    pub async fn submit_request(&self, request: AnalysisRequest) -> Result<JobId, JobError> {
        let plan = self.pipeline.prepare(request)?;
        let pipeline = Arc::clone(&self.pipeline);

        let job_id = self
            .executor
            .submit(JobKind::MultiWorkerAnalysis, move |reporter| async move {
                let result = pipeline.run(&reporter, plan).await?;
                Ok::<_, anyhow::Error>(serde_json::to_value(result)?)
            })
            .await?;

        tracing::info!(job_id = %job_id, "analysis job accepted");
        Ok(job_id)
    }
}

#[async_trait]
impl JobSubmitter for AnalysisService {
    fn kind(&self) -> JobKind {
        JobKind::MultiWorkerAnalysis
    }

    async fn submit(&self, request: Value) -> Result<JobId, JobError> {
        let request: AnalysisRequest = decode_request(request)?;
        self.submit_request(request).await
    }
}
