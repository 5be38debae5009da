//! Conclave - asynchronous job lifecycle and multi-worker fan-out for
//! long-running requests.
//!
//! A client submits work ("ingest this document", "ask every specialist about
//! this case"), gets a job id back immediately, and polls for progress and
//! the final result instead of holding a connection open.
//!
//! # Core Concepts
//!
//! - **Job**: a [`JobRecord`] tracked by id through a forward-only state
//!   machine (`INITIATED -> [SAVING ->] PROCESSING -> CONCLUDED | ERROR`).
//!
//! - **Store**: the [`JobStore`] trait holds records; [`InMemoryJobStore`] is
//!   the process-local default.
//!
//! - **Lifecycle**: [`JobLifecycle`] enforces transitions and monotonic
//!   progress. Stage labels map to statuses and progress ranges through a
//!   [`ProgressPolicy`].
//!
//! - **Executor**: [`BackgroundExecutor`] runs each job body on its own task
//!   and guarantees exactly one terminal transition, panics included.
//!
//! - **Fan-out**: [`FanOutCoordinator`] runs [`Worker`]s concurrently with
//!   per-worker timeouts and isolated failures; [`ResultCompiler`] merges
//!   their outputs through a [`Synthesizer`].
//!
//! - **Polling**: [`JobPoller`] and the axum routes in [`http`] expose status
//!   and results.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use conclave::*;
//!
//! let engine = EngineBuilder::new(ConclaveConfig::from_env()?).build()?;
//! let analysis = engine.analysis_service(retriever, registry, synthesizer);
//! let app = axum::Router::new().nest("/analysis", engine.routes(Arc::new(analysis)));
//! ```

/// Result compilation and the synthesizer seam.
pub mod compiler;

/// Configuration loaded from defaults and `CONCLAVE_*` environment variables.
pub mod config;

/// Shared analysis context and the retriever seam.
pub mod context;

pub mod error;

/// In-process broadcast of job lifecycle events.
pub mod events;

/// Concurrent worker invocation with progress reporting.
pub mod fanout;

/// Axum routes for submitting and polling jobs.
pub mod http;

/// Job records, ids, statuses and worker tasks.
pub mod job;

/// Job state machine on top of a store.
pub mod lifecycle;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Job bodies per kind.
pub mod pipeline;

/// Read-only polling facade.
pub mod poller;

/// Stage-to-progress policy tables.
pub mod progress;

/// Worker trait and registry.
pub mod registry;

/// Engine assembly and background execution.
pub mod runtime;

/// Job store trait and in-memory implementation.
pub mod store;

/// Tracing spans and metric hooks.
pub mod telemetry;

pub use compiler::{
    check_probabilities, FailedWorker, FinalResult, ProbabilityEstimate, ResultCompiler,
    Synthesis, Synthesizer,
};
pub use config::{
    CompilerConfig, ConclaveConfig, EventConfig, ExecutorConfig, FanOutConfig, HttpConfig,
};
pub use context::{AnalysisContext, ContextRetriever, NoContext, ScopeFilter, TextSnippet};
pub use error::JobError;
pub use events::{EventMeta, InProcEventBus, JobEvent, JobEventPayload};
pub use fanout::FanOutCoordinator;
pub use http::job_routes;
pub use job::{
    JobId, JobKind, JobRecord, JobStatus, StageEntry, WorkerId, WorkerTask, WorkerTaskStatus,
};
pub use lifecycle::JobLifecycle;
pub use pipeline::{
    AnalysisPipeline, AnalysisPlan, AnalysisRequest, AnalysisService, DocumentChunk,
    IngestDocument, IngestionOutcome, IngestionPipeline, IngestionRequest, IngestionService,
    IngestionStage, JobSubmitter,
};
pub use poller::{JobPoller, JobStatusView};
pub use progress::{KindPolicy, ProgressPolicy, ProgressRange, StagePolicy};
pub use registry::{Worker, WorkerHandle, WorkerRegistry};
pub use runtime::{BackgroundExecutor, Engine, EngineBuilder, JobReporter};
pub use store::{InMemoryJobStore, JobStore, RecordMutation};
