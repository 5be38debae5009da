use conclave::{JobId, JobPoller, JobStatusView};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Poll until the job is `CONCLUDED` or `ERROR`.
pub async fn wait_for_terminal(
    poller: &JobPoller,
    job_id: JobId,
    timeout: Duration,
) -> anyhow::Result<JobStatusView> {
    wait_until(poller, job_id, timeout, |view| view.status.is_terminal()).await
}

/// Poll until the job reports at least `progress`.
pub async fn wait_for_progress(
    poller: &JobPoller,
    job_id: JobId,
    progress: u8,
    timeout: Duration,
) -> anyhow::Result<JobStatusView> {
    wait_until(poller, job_id, timeout, |view| view.progress >= progress).await
}

async fn wait_until<F>(
    poller: &JobPoller,
    job_id: JobId,
    timeout: Duration,
    done: F,
) -> anyhow::Result<JobStatusView>
where
    F: Fn(&JobStatusView) -> bool,
{
    let poll = async {
        loop {
            let view = poller.get_status(job_id).await?;
            if done(&view) {
                return Ok::<_, anyhow::Error>(view);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => {
            let last = poller.get_status(job_id).await?;
            anyhow::bail!(
                "job {job_id} still {} at {}% after {:?}",
                last.status,
                last.progress,
                timeout
            )
        }
    }
}
