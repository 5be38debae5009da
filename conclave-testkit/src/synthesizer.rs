use async_trait::async_trait;
use conclave::{AnalysisContext, ProbabilityEstimate, Synthesis, Synthesizer, WorkerId};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Joins worker ids into the narrative and records what it was given.
///
/// With no outputs the narrative is built from the context snippets alone.
#[derive(Clone, Default)]
pub struct EchoSynthesizer {
    probabilities: Vec<ProbabilityEstimate>,
    seen: Arc<Mutex<Vec<Vec<WorkerId>>>>,
}

impl EchoSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probabilities(mut self, probabilities: Vec<ProbabilityEstimate>) -> Self {
        self.probabilities = probabilities;
        self
    }

    /// Worker ids passed to each `synthesize` call, in call order.
    pub fn record(&self) -> Vec<Vec<WorkerId>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(
        &self,
        context: &AnalysisContext,
        outputs: &[(WorkerId, Value)],
    ) -> anyhow::Result<Synthesis> {
        self.seen
            .lock()
            .push(outputs.iter().map(|(id, _)| id.clone()).collect());

        let narrative = if outputs.is_empty() {
            format!(
                "context only ({} snippets) for: {}",
                context.snippets.len(),
                context.query
            )
        } else {
            let ids: Vec<&str> = outputs.iter().map(|(id, _)| id.as_str()).collect();
            format!("{} for: {}", ids.join(", "), context.query)
        };

        Ok(Synthesis::narrative(narrative).with_probabilities(self.probabilities.clone()))
    }
}

/// Fails every synthesis.
#[derive(Clone)]
pub struct FailingSynthesizer {
    message: String,
}

impl FailingSynthesizer {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Synthesizer for FailingSynthesizer {
    async fn synthesize(
        &self,
        _context: &AnalysisContext,
        _outputs: &[(WorkerId, Value)],
    ) -> anyhow::Result<Synthesis> {
        anyhow::bail!("{}", self.message)
    }
}
