use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::Instrument;

use crate::config::FanOutConfig;
use crate::context::AnalysisContext;
use crate::job::WorkerTask;
use crate::progress::ProgressRange;
use crate::registry::WorkerHandle;
use crate::runtime::{panic_message, JobReporter};
use crate::telemetry;

const DROPPED_WORKER_MESSAGE: &str = "worker task dropped before reporting";

/// Runs a set of workers concurrently against one shared context.
///
/// Each worker gets its own task and its own timeout. A worker that errors,
/// times out or panics yields a failed [`WorkerTask`]; its siblings keep
/// running. Completions travel over a channel to the coordinating task, which
/// is the only place progress is reported from.
#[derive(Clone, Debug)]
pub struct FanOutCoordinator {
    worker_timeout: Duration,
}

impl Default for FanOutCoordinator {
    fn default() -> Self {
        Self::new(&FanOutConfig::default())
    }
}

impl FanOutCoordinator {
    pub fn new(config: &FanOutConfig) -> Self {
        Self::with_timeout(config.worker_timeout())
    }

    pub fn with_timeout(worker_timeout: Duration) -> Self {
        Self { worker_timeout }
    }

    pub fn worker_timeout(&self) -> Duration {
        self.worker_timeout
    }

    /// Invoke every worker and collect one [`WorkerTask`] per worker, in the
    /// order `workers` was given.
    ///
    /// Progress starts at `range.lo` and each completion moves it to
    /// `lo + (hi - lo) * completed / total`. Completions that arrive together
    /// are reported in registration order. `timeout` overrides the
    /// coordinator's default for this round.
    pub async fn run(
        &self,
        reporter: &JobReporter,
        stage_label: &str,
        range: ProgressRange,
        workers: &[WorkerHandle],
        context: Arc<AnalysisContext>,
        timeout: Option<Duration>,
    ) -> Vec<WorkerTask> {
        let job_id = reporter.job_id().to_string();
        let span = telemetry::fanout_span(&job_id, workers.len());
        let limit = timeout.unwrap_or(self.worker_timeout);

        async move {
            let total = workers.len();
            reporter.advance(stage_label, range.lo).await;

            if total == 0 {
                tracing::debug!("no workers selected");
                reporter.advance(stage_label, range.hi).await;
                return Vec::new();
            }

            let mut slots: Vec<WorkerTask> = workers
                .iter()
                .map(|handle| WorkerTask::pending(handle.id.clone()))
                .collect();

            let (tx, mut rx) = mpsc::unbounded_channel::<(usize, WorkerTask)>();
            for (index, handle) in workers.iter().cloned().enumerate() {
                slots[index].mark_running();
                let tx = tx.clone();
                let context = Arc::clone(&context);
                let span = telemetry::worker_span(&job_id, handle.id.as_str());
                tokio::spawn(
                    async move {
                        let task = invoke_worker(handle, context, limit).await;
                        let _ = tx.send((index, task));
                    }
                    .instrument(span),
                );
            }
            drop(tx);

            let mut completed = 0;
            while let Some(first) = rx.recv().await {
                let mut batch = vec![first];
                while let Ok(next) = rx.try_recv() {
                    batch.push(next);
                }
                batch.sort_by_key(|(index, _)| *index);

                for (index, task) in batch {
                    completed += 1;
                    reporter.worker_finished(&task);
                    reporter
                        .advance(stage_label, range.step(completed, total))
                        .await;
                    slots[index] = task;
                }
            }

            if completed < total {
                tracing::error!(
                    completed,
                    total,
                    "fan-out channel closed before every worker reported"
                );
                reporter.advance(stage_label, range.hi).await;
            }

            let tasks: Vec<WorkerTask> = slots
                .into_iter()
                .map(|task| {
                    if task.is_finished() {
                        task
                    } else {
                        WorkerTask::failed(task.worker_id, DROPPED_WORKER_MESSAGE, Duration::ZERO)
                    }
                })
                .collect();

            let failed = tasks.iter().filter(|t| !t.is_success()).count();
            tracing::info!(total, failed, "fan-out finished");
            tasks
        }
        .instrument(span)
        .await
    }

    /// [`run`](Self::run) over the range the policy assigns to `stage_label`.
    pub async fn run_stage(
        &self,
        reporter: &JobReporter,
        stage_label: &str,
        workers: &[WorkerHandle],
        context: Arc<AnalysisContext>,
        timeout: Option<Duration>,
    ) -> Vec<WorkerTask> {
        let range = reporter.range(stage_label);
        self.run(reporter, stage_label, range, workers, context, timeout)
            .await
    }
}

async fn invoke_worker(
    handle: WorkerHandle,
    context: Arc<AnalysisContext>,
    limit: Duration,
) -> WorkerTask {
    let started = Instant::now();
    let worker = Arc::clone(&handle.worker);
    let mut call = tokio::spawn(
        async move { worker.invoke(&context).await }.in_current_span(),
    );

    match tokio::time::timeout(limit, &mut call).await {
        Ok(Ok(Ok(output))) => WorkerTask::succeeded(handle.id, output, started.elapsed()),
        Ok(Ok(Err(err))) => WorkerTask::failed(handle.id, format!("{err:#}"), started.elapsed()),
        Ok(Err(join_err)) => {
            let message = if join_err.is_panic() {
                format!("worker panicked: {}", panic_message(join_err.into_panic()))
            } else {
                format!("worker task cancelled: {join_err}")
            };
            WorkerTask::failed(handle.id, message, started.elapsed())
        }
        Err(_) => {
            call.abort();
            WorkerTask::failed(
                handle.id,
                format!("worker timed out after {}ms", limit.as_millis()),
                started.elapsed(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{InProcEventBus, JobEventPayload};
    use crate::job::{JobKind, WorkerId, WorkerTaskStatus};
    use crate::lifecycle::JobLifecycle;
    use crate::progress::{analysis_stages, ProgressPolicy};
    use crate::registry::Worker;
    use crate::store::InMemoryJobStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::{Notify, Semaphore};

    struct Delayed {
        delay: Duration,
        output: Value,
    }

    #[async_trait]
    impl Worker for Delayed {
        async fn invoke(&self, _context: &AnalysisContext) -> anyhow::Result<Value> {
            tokio::time::sleep(self.delay).await;
            Ok(self.output.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl Worker for Broken {
        async fn invoke(&self, _context: &AnalysisContext) -> anyhow::Result<Value> {
            anyhow::bail!("model unavailable")
        }
    }

    struct Panics;

    #[async_trait]
    impl Worker for Panics {
        async fn invoke(&self, _context: &AnalysisContext) -> anyhow::Result<Value> {
            panic!("index out of range")
        }
    }

    struct NeverFinishes {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Worker for NeverFinishes {
        async fn invoke(&self, _context: &AnalysisContext) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    /// Signals arrival, then waits on its own gate.
    struct Gated {
        gate: Arc<Semaphore>,
        arrived: Arc<AtomicUsize>,
        all_waiting: Arc<Notify>,
    }

    #[async_trait]
    impl Worker for Gated {
        async fn invoke(&self, context: &AnalysisContext) -> anyhow::Result<Value> {
            self.arrived.fetch_add(1, Ordering::SeqCst);
            self.all_waiting.notify_one();
            let _permit = self.gate.acquire().await?;
            Ok(json!(context.query))
        }
    }

    fn handle(id: &str, worker: impl Worker + 'static) -> WorkerHandle {
        WorkerHandle {
            id: WorkerId::new(id),
            worker: Arc::new(worker),
        }
    }

    async fn setup() -> (Arc<JobLifecycle>, JobReporter) {
        let lifecycle = Arc::new(JobLifecycle::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(ProgressPolicy::default()),
            Arc::new(InProcEventBus::new(256)),
        ));
        let job_id = lifecycle.create(JobKind::MultiWorkerAnalysis).await.unwrap();
        let reporter = lifecycle.reporter(job_id, JobKind::MultiWorkerAnalysis);
        (lifecycle, reporter)
    }

    #[tokio::test]
    async fn results_follow_registration_order() {
        let (_lifecycle, reporter) = setup().await;
        let workers = vec![
            handle(
                "slow",
                Delayed {
                    delay: Duration::from_millis(40),
                    output: json!("slow"),
                },
            ),
            handle(
                "fast",
                Delayed {
                    delay: Duration::from_millis(1),
                    output: json!("fast"),
                },
            ),
        ];

        let tasks = FanOutCoordinator::default()
            .run_stage(
                &reporter,
                analysis_stages::WORKERS,
                &workers,
                Arc::new(AnalysisContext::new("q")),
                None,
            )
            .await;

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].worker_id.as_str(), "slow");
        assert_eq!(tasks[0].output, Some(json!("slow")));
        assert_eq!(tasks[1].worker_id.as_str(), "fast");
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let (_lifecycle, reporter) = setup().await;
        let finished = Arc::new(AtomicBool::new(false));
        let workers = vec![
            handle(
                "ok",
                Delayed {
                    delay: Duration::ZERO,
                    output: json!({"finding": "normal"}),
                },
            ),
            handle("broken", Broken),
            handle("panics", Panics),
            handle(
                "hangs",
                NeverFinishes {
                    finished: Arc::clone(&finished),
                },
            ),
        ];

        let tasks = FanOutCoordinator::with_timeout(Duration::from_millis(50))
            .run_stage(
                &reporter,
                analysis_stages::WORKERS,
                &workers,
                Arc::new(AnalysisContext::new("q")),
                None,
            )
            .await;

        assert_eq!(tasks[0].status, WorkerTaskStatus::Succeeded);
        assert_eq!(tasks[1].error.as_deref(), Some("model unavailable"));
        assert_eq!(
            tasks[2].error.as_deref(),
            Some("worker panicked: index out of range")
        );
        assert!(tasks[3]
            .error
            .as_deref()
            .unwrap()
            .starts_with("worker timed out"));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn progress_steps_through_range() {
        let (lifecycle, reporter) = setup().await;
        let workers: Vec<_> = (0..4)
            .map(|i| {
                handle(
                    &format!("w{i}"),
                    Delayed {
                        delay: Duration::from_millis(5 * (i + 1)),
                        output: json!(i),
                    },
                )
            })
            .collect();

        FanOutCoordinator::default()
            .run(
                &reporter,
                analysis_stages::WORKERS,
                ProgressRange::new(20, 60),
                &workers,
                Arc::new(AnalysisContext::new("q")),
                None,
            )
            .await;

        let record = lifecycle.get(reporter.job_id()).await.unwrap();
        let steps: Vec<u8> = record
            .stage_history
            .iter()
            .filter(|entry| entry.stage_label == analysis_stages::WORKERS)
            .map(|entry| entry.progress)
            .collect();
        assert_eq!(steps, vec![20, 30, 40, 50, 60]);
    }

    #[tokio::test]
    async fn zero_workers_reports_range_end() {
        let (lifecycle, reporter) = setup().await;
        let tasks = FanOutCoordinator::default()
            .run(
                &reporter,
                analysis_stages::WORKERS,
                ProgressRange::new(15, 85),
                &[],
                Arc::new(AnalysisContext::new("q")),
                None,
            )
            .await;

        assert!(tasks.is_empty());
        let record = lifecycle.get(reporter.job_id()).await.unwrap();
        assert_eq!(record.progress, 85);
        assert!(!record.is_terminal());
    }

    #[tokio::test]
    async fn each_worker_publishes_one_event() {
        let (lifecycle, reporter) = setup().await;
        let mut rx = lifecycle.events().subscribe();
        let workers = vec![handle("broken", Broken), handle("also-broken", Broken)];

        FanOutCoordinator::default()
            .run_stage(
                &reporter,
                analysis_stages::WORKERS,
                &workers,
                Arc::new(AnalysisContext::new("q")),
                None,
            )
            .await;

        let mut finished = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let JobEventPayload::WorkerFinished { worker_id, .. } = event.payload {
                finished.push(worker_id);
            }
        }
        finished.sort();
        assert_eq!(
            finished,
            vec![WorkerId::new("also-broken"), WorkerId::new("broken")]
        );
    }

    #[tokio::test]
    async fn simultaneous_completions_report_in_registration_order() {
        let (lifecycle, reporter) = setup().await;
        let mut rx = lifecycle.events().subscribe();
        let arrived = Arc::new(AtomicUsize::new(0));
        let all_waiting = Arc::new(Notify::new());
        let gates: Vec<Arc<Semaphore>> = (0..3).map(|_| Arc::new(Semaphore::new(0))).collect();
        let workers: Vec<_> = gates
            .iter()
            .enumerate()
            .map(|(i, gate)| {
                handle(
                    &format!("w{i}"),
                    Gated {
                        gate: Arc::clone(gate),
                        arrived: Arc::clone(&arrived),
                        all_waiting: Arc::clone(&all_waiting),
                    },
                )
            })
            .collect();

        // Release the gates last-to-first without yielding in between.
        let opener = {
            let arrived = Arc::clone(&arrived);
            let all_waiting = Arc::clone(&all_waiting);
            let gates = gates.clone();
            tokio::spawn(async move {
                while arrived.load(Ordering::SeqCst) < gates.len() {
                    all_waiting.notified().await;
                }
                for gate in gates.iter().rev() {
                    gate.add_permits(1);
                }
            })
        };

        let tasks = FanOutCoordinator::default()
            .run(
                &reporter,
                analysis_stages::WORKERS,
                ProgressRange::new(10, 40),
                &workers,
                Arc::new(AnalysisContext::new("q")),
                None,
            )
            .await;
        opener.await.unwrap();
        assert!(tasks.iter().all(|task| task.is_success()));

        let mut finished = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let JobEventPayload::WorkerFinished { worker_id, .. } = event.payload {
                finished.push(worker_id);
            }
        }
        assert_eq!(
            finished,
            vec![WorkerId::new("w0"), WorkerId::new("w1"), WorkerId::new("w2")]
        );

        let record = lifecycle.get(reporter.job_id()).await.unwrap();
        let steps: Vec<u8> = record
            .stage_history
            .iter()
            .filter(|entry| entry.stage_label == analysis_stages::WORKERS)
            .map(|entry| entry.progress)
            .collect();
        assert_eq!(steps, vec![10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn returned_tasks_are_all_finished() {
        let (_lifecycle, reporter) = setup().await;
        let workers = vec![
            handle("broken", Broken),
            handle(
                "ok",
                Delayed {
                    delay: Duration::ZERO,
                    output: json!("fine"),
                },
            ),
        ];

        let tasks = FanOutCoordinator::default()
            .run_stage(
                &reporter,
                analysis_stages::WORKERS,
                &workers,
                Arc::new(AnalysisContext::new("q")),
                None,
            )
            .await;

        assert!(tasks.iter().all(WorkerTask::is_finished));
        assert_eq!(tasks[0].status, WorkerTaskStatus::Failed);
        assert_eq!(tasks[1].status, WorkerTaskStatus::Succeeded);
    }
}
