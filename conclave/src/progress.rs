use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::job::{JobKind, JobStatus};

/// Stage names used by the built-in ingestion policy.
pub mod ingestion_stages {
    pub const SAVING: &str = "saving";
    pub const EXTRACTION: &str = "extraction";
    pub const OCR: &str = "ocr";
    pub const CHUNKING: &str = "chunking";
    pub const EMBEDDING: &str = "embedding";
    pub const PERSISTENCE: &str = "persistence";
}

/// Stage names used by the built-in multi-worker analysis policy.
pub mod analysis_stages {
    pub const RETRIEVAL: &str = "retrieval";
    pub const WORKERS: &str = "workers";
    pub const SYNTHESIS: &str = "synthesis";
}

/// Reserved slice of the 0–100 progress scale for one stage.
///
/// Deserialization rejects `lo > hi` and bounds above 100.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawProgressRange")]
pub struct ProgressRange {
    pub lo: u8,
    pub hi: u8,
}

#[derive(Deserialize)]
struct RawProgressRange {
    lo: u8,
    hi: u8,
}

impl TryFrom<RawProgressRange> for ProgressRange {
    type Error = String;

    fn try_from(raw: RawProgressRange) -> Result<Self, Self::Error> {
        if raw.hi > 100 {
            return Err(format!("progress range end {} exceeds 100", raw.hi));
        }
        if raw.lo > raw.hi {
            return Err(format!(
                "progress range start {} is above its end {}",
                raw.lo, raw.hi
            ));
        }
        Ok(Self {
            lo: raw.lo,
            hi: raw.hi,
        })
    }
}

impl ProgressRange {
    pub fn new(lo: u8, hi: u8) -> Self {
        let hi = hi.min(100);
        Self { lo: lo.min(hi), hi }
    }

    /// Map a fraction of this stage (clamped to `0.0..=1.0`) onto the range.
    pub fn at(&self, fraction: f64) -> u8 {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let span = f64::from(self.hi.saturating_sub(self.lo));
        self.lo + (span * fraction).floor() as u8
    }

    /// Progress after `completed` of `total` equal units of work.
    pub fn step(&self, completed: usize, total: usize) -> u8 {
        if total == 0 {
            return self.hi;
        }
        let completed = completed.min(total);
        let span = usize::from(self.hi.saturating_sub(self.lo));
        self.lo + (span * completed / total) as u8
    }
}

/// A named stage: the status it puts the job in and its progress slice.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StagePolicy {
    pub label: String,
    pub status: JobStatus,
    pub range: ProgressRange,
}

/// Ordered stage table for one job kind.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KindPolicy {
    stages: Vec<StagePolicy>,
}

impl KindPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn with_stage(
        mut self,
        label: impl Into<String>,
        status: JobStatus,
        lo: u8,
        hi: u8,
    ) -> Self {
        self.stages.push(StagePolicy {
            label: label.into(),
            status,
            range: ProgressRange::new(lo, hi),
        });
        self
    }

    pub fn stage(&self, label: &str) -> Option<&StagePolicy> {
        self.stages.iter().find(|stage| stage.label == label)
    }

    pub fn stages(&self) -> &[StagePolicy] {
        &self.stages
    }
}

/// Progress policy table keyed by job kind.
///
/// The lifecycle manager consults this table to resolve which status a stage
/// label moves a job into; job bodies consult it to place their progress
/// reports. Adding a kind means adding a table here, never touching the
/// state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressPolicy {
    kinds: HashMap<JobKind, KindPolicy>,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        use self::analysis_stages::*;
        use self::ingestion_stages::*;

        let ingestion = KindPolicy::new()
            .with_stage(SAVING, JobStatus::Saving, 0, 10)
            .with_stage(EXTRACTION, JobStatus::Processing, 10, 30)
            .with_stage(OCR, JobStatus::Processing, 30, 60)
            .with_stage(CHUNKING, JobStatus::Processing, 60, 80)
            .with_stage(EMBEDDING, JobStatus::Processing, 80, 95)
            .with_stage(PERSISTENCE, JobStatus::Processing, 95, 100);

        let analysis = KindPolicy::new()
            .with_stage(RETRIEVAL, JobStatus::Processing, 0, 15)
            .with_stage(WORKERS, JobStatus::Processing, 15, 85)
            .with_stage(SYNTHESIS, JobStatus::Processing, 85, 100);

        Self::empty()
            .with_kind(JobKind::Ingestion, ingestion)
            .with_kind(JobKind::MultiWorkerAnalysis, analysis)
    }
}

impl ProgressPolicy {
    /// A table with no kinds registered.
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Register or replace the table for a kind.
    pub fn with_kind(mut self, kind: JobKind, policy: KindPolicy) -> Self {
        self.kinds.insert(kind, policy);
        self
    }

    pub fn kind(&self, kind: JobKind) -> Option<&KindPolicy> {
        self.kinds.get(&kind)
    }

    pub fn stage(&self, kind: JobKind, label: &str) -> Option<&StagePolicy> {
        self.kind(kind).and_then(|policy| policy.stage(label))
    }

    /// Progress range reserved for `label`, or the full scale when the stage
    /// is not in the table.
    pub fn range(&self, kind: JobKind, label: &str) -> ProgressRange {
        self.stage(kind, label)
            .map(|stage| stage.range)
            .unwrap_or(ProgressRange { lo: 0, hi: 100 })
    }

    /// Status a job of `kind` enters when it reports `label`.
    ///
    /// Stages missing from the table count as processing work.
    pub fn status_for(&self, kind: JobKind, label: &str) -> JobStatus {
        self.stage(kind, label)
            .map(|stage| stage.status)
            .unwrap_or(JobStatus::Processing)
    }
}
