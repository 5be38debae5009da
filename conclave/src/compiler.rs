use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CompilerConfig;
use crate::context::AnalysisContext;
use crate::job::{WorkerId, WorkerTask};

/// One labelled likelihood in a synthesis, as a percentage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityEstimate {
    pub label: String,
    pub percent: f64,
}

impl ProbabilityEstimate {
    pub fn new(label: impl Into<String>, percent: f64) -> Self {
        Self {
            label: label.into(),
            percent,
        }
    }
}

/// What a [`Synthesizer`] produces from the surviving worker outputs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub narrative: String,
    #[serde(default)]
    pub probabilities: Vec<ProbabilityEstimate>,
}

impl Synthesis {
    pub fn narrative(narrative: impl Into<String>) -> Self {
        Self {
            narrative: narrative.into(),
            probabilities: Vec::new(),
        }
    }

    pub fn with_probabilities(mut self, probabilities: Vec<ProbabilityEstimate>) -> Self {
        self.probabilities = probabilities;
        self
    }
}

/// Merges worker outputs into one narrative.
///
/// `outputs` holds only successful workers, in registration order, and is
/// empty when every worker failed. An `Err` fails the whole job.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        context: &AnalysisContext,
        outputs: &[(WorkerId, Value)],
    ) -> anyhow::Result<Synthesis>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedWorker {
    pub worker_id: WorkerId,
    pub error: String,
}

/// The stored result of a concluded analysis job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalResult {
    pub narrative: String,
    /// Every worker task, successful or not, in registration order.
    pub workers: Vec<WorkerTask>,
    pub failed_workers: Vec<FailedWorker>,
    /// No worker succeeded and the narrative comes from context alone.
    pub degraded: bool,
    pub context_snippets: usize,
    #[serde(default)]
    pub probabilities: Vec<ProbabilityEstimate>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Builds a [`FinalResult`] from the fan-out outcome.
#[derive(Clone)]
pub struct ResultCompiler {
    synthesizer: std::sync::Arc<dyn Synthesizer>,
    probability_tolerance: f64,
}

impl std::fmt::Debug for ResultCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCompiler")
            .field("probability_tolerance", &self.probability_tolerance)
            .finish_non_exhaustive()
    }
}

impl ResultCompiler {
    pub fn new(synthesizer: std::sync::Arc<dyn Synthesizer>, config: &CompilerConfig) -> Self {
        Self {
            synthesizer,
            probability_tolerance: config.probability_tolerance,
        }
    }

    pub async fn compile(
        &self,
        context: &AnalysisContext,
        tasks: Vec<WorkerTask>,
    ) -> anyhow::Result<FinalResult> {
        let mut outputs = Vec::new();
        let mut failed_workers = Vec::new();
        for task in &tasks {
            match (&task.output, task.is_success()) {
                (Some(output), true) => outputs.push((task.worker_id.clone(), output.clone())),
                _ => failed_workers.push(FailedWorker {
                    worker_id: task.worker_id.clone(),
                    error: task
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("worker ended in {:?}", task.status)),
                }),
            }
        }

        let degraded = outputs.is_empty();
        if degraded {
            tracing::warn!(
                workers = tasks.len(),
                "no worker succeeded, synthesizing from context alone"
            );
        }

        let synthesis = self.synthesizer.synthesize(context, &outputs).await?;

        let mut warnings = Vec::new();
        if let Some(warning) =
            check_probabilities(&synthesis.probabilities, self.probability_tolerance)
        {
            tracing::warn!(warning = %warning, "synthesis failed probability check");
            warnings.push(warning);
        }

        Ok(FinalResult {
            narrative: synthesis.narrative,
            workers: tasks,
            failed_workers,
            degraded,
            context_snippets: context.snippets.len(),
            probabilities: synthesis.probabilities,
            warnings,
        })
    }
}

/// Returns a warning when non-empty estimates do not sum to 100 within
/// `tolerance` percentage points.
pub fn check_probabilities(estimates: &[ProbabilityEstimate], tolerance: f64) -> Option<String> {
    if estimates.is_empty() {
        return None;
    }
    if let Some(bad) = estimates
        .iter()
        .find(|e| !e.percent.is_finite() || e.percent < 0.0)
    {
        return Some(format!(
            "probability for {:?} is not a valid percentage: {}",
            bad.label, bad.percent
        ));
    }
    let total: f64 = estimates.iter().map(|e| e.percent).sum();
    if (total - 100.0).abs() > tolerance {
        Some(format!(
            "probabilities sum to {total:.1}%, expected 100% \u{b1} {tolerance}"
        ))
    } else {
        None
    }
}
