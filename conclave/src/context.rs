use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A retrieved piece of source text shared with every worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextSnippet {
    pub source_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl TextSnippet {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
            score: None,
            metadata: Value::Null,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

/// Restricts retrieval to a subset of the corpus.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFilter {
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ScopeFilter {
    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty() && self.tags.is_empty()
    }
}

/// Read-only input handed to every worker of one analysis job.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeFilter>,
    #[serde(default)]
    pub snippets: Vec<TextSnippet>,
    /// Free-form request parameters passed through to workers untouched.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
}

impl AnalysisContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_snippets(mut self, snippets: Vec<TextSnippet>) -> Self {
        self.snippets = snippets;
        self
    }
}

/// Source of supporting text for an analysis query.
///
/// A retrieval failure is systemic: the job fails before any worker runs.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        scope: Option<&ScopeFilter>,
    ) -> anyhow::Result<Vec<TextSnippet>>;
}

/// Retriever that never finds anything. Useful when workers carry their own
/// knowledge.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoContext;

#[async_trait]
impl ContextRetriever for NoContext {
    async fn retrieve(
        &self,
        _query: &str,
        _scope: Option<&ScopeFilter>,
    ) -> anyhow::Result<Vec<TextSnippet>> {
        Ok(Vec::new())
    }
}
