use async_trait::async_trait;
use conclave::{ContextRetriever, ScopeFilter, TextSnippet};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct RetrievalRecord {
    pub query: String,
    pub scope: Option<ScopeFilter>,
}

/// Returns the same snippets for every query and records each call.
#[derive(Clone, Default)]
pub struct StaticRetriever {
    snippets: Vec<TextSnippet>,
    calls: Arc<Mutex<Vec<RetrievalRecord>>>,
}

impl StaticRetriever {
    pub fn new(snippets: Vec<TextSnippet>) -> Self {
        Self {
            snippets,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record(&self) -> Vec<RetrievalRecord> {
        self.calls.lock().clone()
    }

    pub fn assert_call_count_eq(&self, expected: usize) {
        let actual = self.calls.lock().len();
        assert_eq!(
            actual, expected,
            "Expected {} retrievals, got {}",
            expected, actual
        );
    }
}

#[async_trait]
impl ContextRetriever for StaticRetriever {
    async fn retrieve(
        &self,
        query: &str,
        scope: Option<&ScopeFilter>,
    ) -> anyhow::Result<Vec<TextSnippet>> {
        self.calls.lock().push(RetrievalRecord {
            query: query.to_string(),
            scope: scope.cloned(),
        });
        Ok(self.snippets.clone())
    }
}

/// Fails every retrieval.
#[derive(Clone)]
pub struct FailingRetriever {
    message: String,
    calls: Arc<Mutex<usize>>,
}

impl FailingRetriever {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl ContextRetriever for FailingRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        _scope: Option<&ScopeFilter>,
    ) -> anyhow::Result<Vec<TextSnippet>> {
        *self.calls.lock() += 1;
        anyhow::bail!("{}", self.message)
    }
}
