use async_trait::async_trait;
use conclave::{DocumentChunk, IngestDocument, IngestionStage, JobReporter};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Holds a scripted stage at a checkpoint until the test opens it.
#[derive(Clone)]
pub struct StageGate {
    permits: Arc<Semaphore>,
}

impl StageGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Let one waiting checkpoint through.
    pub fn open(&self) {
        self.permits.add_permits(1);
    }

    async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

impl Default for StageGate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct Checkpoint {
    fraction: f64,
    gate: Option<StageGate>,
}

#[derive(Clone, Debug)]
pub struct StageCall {
    pub label: String,
    pub document_id: String,
    pub filename: String,
}

/// Ingestion stage driven by a script: progress checkpoints, optional gates,
/// and a canned effect on the document.
#[derive(Clone)]
pub struct ScriptedStage {
    label: String,
    checkpoints: Vec<Checkpoint>,
    chunks: Option<usize>,
    embed: bool,
    failure: Option<String>,
    extension: Option<String>,
    calls: Arc<Mutex<Vec<StageCall>>>,
}

impl ScriptedStage {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            checkpoints: Vec::new(),
            chunks: None,
            embed: false,
            failure: None,
            extension: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Report `fraction` of the stage as done.
    pub fn report(mut self, fraction: f64) -> Self {
        self.checkpoints.push(Checkpoint {
            fraction,
            gate: None,
        });
        self
    }

    /// Report `fraction`, then wait for `gate` to open.
    pub fn report_and_wait(mut self, fraction: f64, gate: StageGate) -> Self {
        self.checkpoints.push(Checkpoint {
            fraction,
            gate: Some(gate),
        });
        self
    }

    /// Split the document text into `count` chunks.
    pub fn producing_chunks(mut self, count: usize) -> Self {
        self.chunks = Some(count);
        self
    }

    /// Attach a one-dimensional embedding to every chunk.
    pub fn embedding(mut self) -> Self {
        self.embed = true;
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Only apply to filenames with this extension.
    pub fn only_for_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into().to_ascii_lowercase());
        self
    }

    pub fn calls(&self) -> Vec<StageCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl IngestionStage for ScriptedStage {
    fn label(&self) -> &str {
        &self.label
    }

    fn applies(&self, document: &IngestDocument) -> bool {
        match &self.extension {
            Some(extension) => document.extension().as_deref() == Some(extension.as_str()),
            None => true,
        }
    }

    async fn run(
        &self,
        document: &mut IngestDocument,
        reporter: &JobReporter,
    ) -> anyhow::Result<()> {
        self.calls.lock().push(StageCall {
            label: self.label.clone(),
            document_id: document.document_id.to_string(),
            filename: document.filename.clone(),
        });

        for checkpoint in &self.checkpoints {
            reporter
                .stage_progress(&self.label, checkpoint.fraction)
                .await;
            if let Some(gate) = &checkpoint.gate {
                gate.pass().await;
            }
        }

        if let Some(message) = &self.failure {
            anyhow::bail!("{message}");
        }

        if document.text.is_none() {
            document.text = Some(String::from_utf8_lossy(&document.bytes).into_owned());
        }

        if let Some(count) = self.chunks {
            let text = document.text.clone().unwrap_or_default();
            document.chunks = (0..count)
                .map(|index| DocumentChunk {
                    index,
                    text: text.clone(),
                    embedding: None,
                })
                .collect();
        }

        if self.embed {
            for chunk in &mut document.chunks {
                chunk.embedding = Some(vec![chunk.text.len() as f32]);
            }
        }

        Ok(())
    }
}
