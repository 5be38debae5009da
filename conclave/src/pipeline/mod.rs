//! Job bodies for each [`JobKind`], and the submission seam the HTTP layer
//! drives them through.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::JobError;
use crate::job::{JobId, JobKind};

pub mod analysis;
pub mod ingestion;

pub use analysis::{AnalysisPipeline, AnalysisPlan, AnalysisRequest, AnalysisService};
pub use ingestion::{
    DocumentChunk, IngestDocument, IngestionOutcome, IngestionPipeline, IngestionRequest,
    IngestionService, IngestionStage,
};

/// Accepts a request for one job kind and starts it in the background.
///
/// `submit` validates synchronously and returns as soon as the job exists;
/// nothing is created for a rejected request.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn submit(&self, request: Value) -> Result<JobId, JobError>;
}

/// Decode a JSON request body, mapping shape errors to
/// [`JobError::Validation`].
pub(crate) fn decode_request<T: DeserializeOwned>(request: Value) -> Result<T, JobError> {
    serde_json::from_value(request)
        .map_err(|err| JobError::validation(format!("malformed request: {err}")))
}
