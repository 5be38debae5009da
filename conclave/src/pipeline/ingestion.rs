use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::JobError;
use crate::job::{JobId, JobKind};
use crate::progress::ingestion_stages::SAVING;
use crate::progress::ProgressPolicy;
use crate::runtime::{BackgroundExecutor, JobReporter};

use super::{decode_request, JobSubmitter};

/// Body of `POST /jobs` for document ingestion.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IngestionRequest {
    pub filename: String,
    /// Raw document content.
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl IngestionRequest {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn validate(&self) -> Result<(), JobError> {
        if self.filename.trim().is_empty() {
            return Err(JobError::validation("filename must not be empty"));
        }
        if self.content.is_empty() {
            return Err(JobError::validation("content must not be empty"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub index: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Working state of one document, owned by its ingestion job and handed to
/// each stage in turn.
#[derive(Clone, Debug)]
pub struct IngestDocument {
    pub document_id: Uuid,
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    /// Extracted text, filled by the extraction or OCR stage.
    pub text: Option<String>,
    pub chunks: Vec<DocumentChunk>,
    pub metadata: Value,
}

impl IngestDocument {
    fn from_request(request: IngestionRequest) -> Self {
        Self {
            document_id: Uuid::now_v7(),
            filename: request.filename,
            content_type: request.content_type,
            bytes: request.content.into_bytes(),
            text: None,
            chunks: Vec::new(),
            metadata: request.metadata,
        }
    }

    /// Lower-cased extension of the filename, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }
}

/// One step of the ingestion pipeline (extraction, OCR, chunking,
/// embedding, persistence).
///
/// `label` must name a stage in the ingestion progress policy. A stage may
/// report progress inside its own range through the reporter.
#[async_trait]
pub trait IngestionStage: Send + Sync {
    fn label(&self) -> &str;

    /// Whether this stage has work to do for `document`. Skipped stages
    /// leave no progress report.
    fn applies(&self, _document: &IngestDocument) -> bool {
        true
    }

    async fn run(
        &self,
        document: &mut IngestDocument,
        reporter: &JobReporter,
    ) -> anyhow::Result<()>;
}

/// Stored result of a concluded ingestion job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestionOutcome {
    pub document_id: Uuid,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub byte_len: usize,
    pub text_len: usize,
    pub chunk_count: usize,
    pub embedded_chunks: usize,
    pub stages_run: Vec<String>,
    pub stages_skipped: Vec<String>,
}

/// Ordered ingestion stages.
#[derive(Clone, Default)]
pub struct IngestionPipeline {
    stages: Vec<Arc<dyn IngestionStage>>,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.label().to_string()))
            .finish()
    }
}

impl IngestionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Arc<dyn IngestionStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn labels(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.label()).collect()
    }

    /// Check that every stage is known to `policy` and that the stages are
    /// ordered by their progress ranges.
    pub fn validate(&self, policy: &ProgressPolicy) -> anyhow::Result<()> {
        let mut previous_lo = 0;
        for stage in &self.stages {
            let label = stage.label();
            let entry = policy
                .stage(JobKind::Ingestion, label)
                .with_context(|| format!("ingestion stage {label:?} has no progress range"))?;
            if entry.range.lo < previous_lo {
                anyhow::bail!("ingestion stage {label:?} is out of order");
            }
            previous_lo = entry.range.lo;
        }
        Ok(())
    }

    /// Accept the upload, then run each applicable stage in order.
    ///
    /// The `saving` slot is always reported. A registered stage labelled
    /// `saving` runs inside it; otherwise it completes as soon as the
    /// document is materialised.
    pub async fn run(
        &self,
        reporter: &JobReporter,
        request: IngestionRequest,
    ) -> anyhow::Result<IngestionOutcome> {
        reporter.enter_stage(SAVING).await;
        let mut document = IngestDocument::from_request(request);
        tracing::info!(
            document_id = %document.document_id,
            filename = %document.filename,
            bytes = document.bytes.len(),
            "document accepted"
        );
        if !self.stages.iter().any(|stage| stage.label() == SAVING) {
            reporter.finish_stage(SAVING).await;
        }

        let mut stages_run = Vec::new();
        let mut stages_skipped = Vec::new();
        for stage in &self.stages {
            let label = stage.label();
            if !stage.applies(&document) {
                tracing::debug!(stage = label, "stage skipped");
                stages_skipped.push(label.to_string());
                continue;
            }

            reporter.enter_stage(label).await;
            stage
                .run(&mut document, reporter)
                .await
                .with_context(|| format!("{label} failed for {}", document.filename))?;
            reporter.finish_stage(label).await;
            stages_run.push(label.to_string());
        }

        Ok(IngestionOutcome {
            document_id: document.document_id,
            filename: document.filename,
            content_type: document.content_type,
            byte_len: document.bytes.len(),
            text_len: document.text.as_ref().map_or(0, String::len),
            chunk_count: document.chunks.len(),
            embedded_chunks: document
                .chunks
                .iter()
                .filter(|c| c.embedding.is_some())
                .count(),
            stages_run,
            stages_skipped,
        })
    }
}

/// [`JobSubmitter`] for [`JobKind::Ingestion`].
#[derive(Clone, Debug)]
pub struct IngestionService {
    executor: BackgroundExecutor,
    pipeline: Arc<IngestionPipeline>,
}

impl IngestionService {
    pub fn new(executor: BackgroundExecutor, pipeline: Arc<IngestionPipeline>) -> Self {
        Self { executor, pipeline }
    }

    pub async fn submit_request(&self, request: IngestionRequest) -> Result<JobId, JobError> {
        request.validate()?;
        let pipeline = Arc::clone(&self.pipeline);

        let job_id = self
            .executor
            .submit(JobKind::Ingestion, move |reporter| async move {
                let outcome = pipeline.run(&reporter, request).await?;
                Ok::<_, anyhow::Error>(serde_json::to_value(outcome)?)
            })
            .await?;

        tracing::info!(job_id = %job_id, "ingestion job accepted");
        Ok(job_id)
    }
}

#[async_trait]
impl JobSubmitter for IngestionService {
    fn kind(&self) -> JobKind {
        JobKind::Ingestion
    }

    async fn submit(&self, request: Value) -> Result<JobId, JobError> {
        let request: IngestionRequest = decode_request(request)?;
        self.submit_request(request).await
    }
}
