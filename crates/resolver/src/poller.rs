//! Authoritative status polling against a job's fetch URL.

use std::sync::Arc;
use std::time::Duration;

use genwatch_core::job::GenerationStatus;

use crate::backend::CompletionBackend;
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::state::{ProbeResult, ProbeSource};
use crate::supervisor::Supervisor;

/// What one poll of the fetch URL concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The backend reported success with an output URL.
    Ready(ProbeResult),
    /// Still processing, or the poll itself failed transiently.
    Pending,
    /// The backend gave up on the job.
    Failed(String),
}

/// Polls the fetch URL on behalf of one resolver.
pub struct StatusPoller<B: ?Sized> {
    backend: Arc<B>,
    supervisor: Arc<Supervisor>,
    timeout: Duration,
}

impl<B: CompletionBackend + ?Sized> StatusPoller<B> {
    pub fn new(backend: Arc<B>, supervisor: Arc<Supervisor>) -> Self {
        Self {
            backend,
            supervisor,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound each status fetch by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch and interpret the status envelope.
    ///
    /// Transport and decode errors and timeouts are logged and reported
    /// as [`PollOutcome::Pending`]; only an explicit `failed`/`error` status
    /// becomes [`PollOutcome::Failed`].
    pub async fn poll(&self, fetch_url: &str) -> PollOutcome {
        let _in_flight = self.supervisor.track_probe();

        let fetched = tokio::time::timeout(self.timeout, self.backend.fetch_status(fetch_url)).await;
        let envelope = match fetched {
            Ok(Ok(envelope)) => envelope,
            Err(_) => {
                tracing::warn!(
                    fetch_url,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Status poll timed out, retrying next round",
                );
                return PollOutcome::Pending;
            }
            Ok(Err(e)) => {
                tracing::warn!(fetch_url, error = %e, "Status poll failed, retrying next round");
                return PollOutcome::Pending;
            }
        };

        match envelope.status {
            GenerationStatus::Success => match envelope.first_output() {
                Some(url) => PollOutcome::Ready(ProbeResult::ready(
                    ProbeSource::FetchUrl,
                    url.to_string(),
                )),
                None => {
                    tracing::warn!(fetch_url, "Status success without output, still waiting");
                    PollOutcome::Pending
                }
            },
            GenerationStatus::Processing => PollOutcome::Pending,
            status if status.is_failure() => PollOutcome::Failed(
                envelope
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "generation failed".into()),
            ),
            _ => {
                tracing::debug!(fetch_url, "Unrecognised job status, treating as processing");
                PollOutcome::Pending
            }
        }
    }
}
