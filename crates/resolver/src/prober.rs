//! Availability probing of speculative future links.
//!
//! A future link may start serving the artifact before the fetch URL
//! reports success. Probing is a plain HEAD request: `200` means the
//! artifact is there, anything else (including transport errors) means
//! not yet. A probe that outlives its timeout counts as not ready too.
//! Errors never escape; retrying is the resolver's job.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::CompletionBackend;
use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::state::{ProbeResult, ProbeSource};
use crate::supervisor::Supervisor;

/// Probes future links on behalf of one resolver.
pub struct AvailabilityProber<B: ?Sized> {
    backend: Arc<B>,
    supervisor: Arc<Supervisor>,
    timeout: Duration,
}

impl<B: CompletionBackend + ?Sized> AvailabilityProber<B> {
    pub fn new(backend: Arc<B>, supervisor: Arc<Supervisor>) -> Self {
        Self {
            backend,
            supervisor,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound each HEAD request by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// HEAD a single candidate URL.
    pub async fn probe(&self, url: &str) -> ProbeResult {
        let _in_flight = self.supervisor.track_probe();

        let reply = match tokio::time::timeout(self.timeout, self.backend.head(url)).await {
            Ok(reply) => reply,
            Err(_) => {
                tracing::debug!(
                    url,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Future link probe timed out",
                );
                return ProbeResult::not_ready(ProbeSource::FutureLink, Some("timed out".into()));
            }
        };

        match reply {
            Ok(200) => ProbeResult::ready(ProbeSource::FutureLink, url.to_string()),
            Ok(status) => {
                tracing::trace!(url, status, "Future link not available yet");
                ProbeResult::not_ready(ProbeSource::FutureLink, Some(format!("HTTP {status}")))
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "Future link probe failed");
                ProbeResult::not_ready(ProbeSource::FutureLink, Some(e.to_string()))
            }
        }
    }

    /// Probe links in order, stopping at the first ready one.
    pub async fn probe_round(&self, links: &[String]) -> Option<ProbeResult> {
        for link in links {
            let result = self.probe(link).await;
            if result.ready {
                return Some(result);
            }
        }
        None
    }
}
