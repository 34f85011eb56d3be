//! Drives a single generation job from submission to its artifact.

use genwatch_core::job::WorkflowKind;
use genwatch_resolver::api::{GenerationApi, GenerationApiError};
use genwatch_resolver::manager::{ManagerError, ResolverManager};
use genwatch_resolver::retry::{retry_with_backoff, RetryConfig, RetryError};
use genwatch_resolver::{CompletionBackend, ResolverEvent, TerminalOutcome};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Submit `request` and follow the job until it ends.
///
/// Progress is logged as it arrives. When `cancel` fires the job is
/// cancelled and its `Cancelled` outcome is still awaited.
pub async fn run_job<B>(
    manager: &ResolverManager<B>,
    kind: WorkflowKind,
    request: &serde_json::Value,
    cancel: &CancellationToken,
) -> anyhow::Result<TerminalOutcome>
where
    B: CompletionBackend + ?Sized + 'static,
{
    // Subscribe first so an immediate result is not missed.
    let mut events = manager.subscribe();
    let job_id = manager.submit(kind, request).await?;
    tracing::info!(job_id = %job_id, kind = kind.label(), "Tracking job");

    let mut cancel_sent = false;
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled(), if !cancel_sent => {
                cancel_sent = true;
                match manager.cancel_job(job_id).await {
                    // Already finished; its terminal event is in flight.
                    Ok(()) | Err(ManagerError::JobNotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                continue;
            }
            received = events.recv() => received,
        };

        let event = match event {
            Ok(event) if event.job_id == job_id => event.event,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event subscriber lagged");
                continue;
            }
            Err(RecvError::Closed) => anyhow::bail!("event channel closed before job {job_id} ended"),
        };

        match event {
            ResolverEvent::Progress(update) => {
                tracing::info!(
                    job_id = %job_id,
                    percent = update.percent,
                    eta_remaining_seconds = update.eta_remaining_seconds,
                    "Progress",
                );
            }
            ResolverEvent::Terminal(outcome) => return Ok(outcome),
        }
    }
}

/// Download a resolved artifact, retrying transient failures.
pub async fn download_artifact(
    api: &GenerationApi,
    url: &str,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, RetryError<GenerationApiError>> {
    retry_with_backoff(
        |attempt| {
            tracing::debug!(url, attempt, "Downloading artifact");
            api.download(url)
        },
        retry,
        cancel,
    )
    .await
}
