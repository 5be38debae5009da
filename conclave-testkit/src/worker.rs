use async_trait::async_trait;
use conclave::{AnalysisContext, Worker};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared record of worker invocations.
///
/// Clone one monitor into several workers to observe them together.
#[derive(Clone, Default)]
pub struct WorkerMonitor {
    queries: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl WorkerMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().len()
    }

    /// Highest number of monitored workers observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn assert_call_count_eq(&self, expected: usize) {
        let actual = self.call_count();
        assert_eq!(
            actual, expected,
            "Expected {} worker invocations, got {}",
            expected, actual
        );
    }

    fn enter(&self, context: &AnalysisContext) -> RunningGuard {
        self.queries.lock().push(context.query.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        RunningGuard {
            running: Arc::clone(&self.running),
        }
    }
}

struct RunningGuard {
    running: Arc<AtomicUsize>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Returns a fixed output.
#[derive(Clone)]
pub struct StaticWorker {
    output: Value,
    monitor: WorkerMonitor,
}

impl StaticWorker {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            monitor: WorkerMonitor::new(),
        }
    }

    pub fn with_monitor(mut self, monitor: WorkerMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn monitor(&self) -> &WorkerMonitor {
        &self.monitor
    }
}

#[async_trait]
impl Worker for StaticWorker {
    async fn invoke(&self, context: &AnalysisContext) -> anyhow::Result<Value> {
        let _running = self.monitor.enter(context);
        tokio::task::yield_now().await;
        Ok(self.output.clone())
    }
}

/// Always returns an error with the given message.
#[derive(Clone)]
pub struct FailingWorker {
    message: String,
    monitor: WorkerMonitor,
}

impl FailingWorker {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            monitor: WorkerMonitor::new(),
        }
    }

    pub fn with_monitor(mut self, monitor: WorkerMonitor) -> Self {
        self.monitor = monitor;
        self
    }
}

#[async_trait]
impl Worker for FailingWorker {
    async fn invoke(&self, context: &AnalysisContext) -> anyhow::Result<Value> {
        let _running = self.monitor.enter(context);
        anyhow::bail!("{}", self.message)
    }
}

/// Sleeps before answering. Use a delay longer than the fan-out timeout to
/// script a timeout.
#[derive(Clone)]
pub struct SlowWorker {
    delay: Duration,
    output: Value,
    monitor: WorkerMonitor,
}

impl SlowWorker {
    pub fn new(delay: Duration, output: Value) -> Self {
        Self {
            delay,
            output,
            monitor: WorkerMonitor::new(),
        }
    }

    pub fn with_monitor(mut self, monitor: WorkerMonitor) -> Self {
        self.monitor = monitor;
        self
    }
}

#[async_trait]
impl Worker for SlowWorker {
    async fn invoke(&self, context: &AnalysisContext) -> anyhow::Result<Value> {
        let _running = self.monitor.enter(context);
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

/// Panics with the given message.
#[derive(Clone)]
pub struct PanickingWorker {
    message: String,
}

impl PanickingWorker {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Worker for PanickingWorker {
    async fn invoke(&self, _context: &AnalysisContext) -> anyhow::Result<Value> {
        panic!("{}", self.message)
    }
}
