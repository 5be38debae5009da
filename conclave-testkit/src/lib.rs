//! Scripted collaborators for exercising conclave in tests.
//!
//! Every mock records what it saw behind a `parking_lot::Mutex` and exposes
//! `assert_*` helpers, so tests can check both the job outcome and how the
//! collaborators were driven.

pub mod retriever;
pub mod stage;
pub mod synthesizer;
pub mod wait;
pub mod worker;

pub use retriever::{FailingRetriever, RetrievalRecord, StaticRetriever};
pub use stage::{ScriptedStage, StageCall, StageGate};
pub use synthesizer::{EchoSynthesizer, FailingSynthesizer};
pub use wait::{wait_for_progress, wait_for_terminal};
pub use worker::{FailingWorker, PanickingWorker, SlowWorker, StaticWorker, WorkerMonitor};
