//! Multi-job resolver manager.
//!
//! [`ResolverManager`] submits generation requests, starts one resolver
//! per job and keeps them fully isolated: each job owns its own
//! supervisor, epoch and child cancellation token. Per-job events are
//! re-broadcast as [`JobEvent`]s via a [`tokio::sync::broadcast`]
//! channel. Call [`ResolverManager::subscribe`] to receive them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use genwatch_core::error::CoreError;
use genwatch_core::job::{JobDescriptor, SubmissionOutcome, WorkflowKind};
use genwatch_core::types::JobId;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::api::GenerationApiError;
use crate::backend::CompletionBackend;
use crate::config::ResolverConfig;
use crate::events::JobEvent;
use crate::resolver::{CompletionResolver, ResolverHandle};
use crate::state::ResolverState;
use crate::supervisor::Canceller;

/// Broadcast channel capacity for job events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for each job to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs and tracks any number of independent resolvers.
///
/// Created once via [`ResolverManager::new`]; the returned `Arc` can be
/// cheaply cloned into whatever submits jobs.
pub struct ResolverManager<B: ?Sized> {
    backend: Arc<B>,
    /// Running jobs indexed by `job_id`.
    jobs: Arc<RwLock<HashMap<JobId, ManagedJob>>>,
    event_tx: broadcast::Sender<JobEvent>,
    /// Per-kind configuration; kinds without an entry use `for_kind`.
    configs: HashMap<WorkflowKind, ResolverConfig>,
    default_eta_seconds: f64,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

/// Internal bookkeeping for a single job.
struct ManagedJob {
    kind: WorkflowKind,
    canceller: Canceller,
    state: tokio::sync::watch::Receiver<ResolverState>,
    task_handle: tokio::task::JoinHandle<()>,
}

/// Errors that can occur when interacting with the manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The submission HTTP call failed.
    #[error("Failed to submit job: {0}")]
    SubmitFailed(#[from] GenerationApiError),

    /// The backend response could not be turned into a job.
    #[error("Invalid submission response: {0}")]
    InvalidResponse(#[from] CoreError),

    /// No running job has this id.
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// The manager is shutting down.
    #[error("Manager is shut down")]
    ShutDown,
}

impl<B: CompletionBackend + ?Sized + 'static> ResolverManager<B> {
    /// Create a manager over `backend`.
    ///
    /// `default_eta_seconds` is used for processing responses that carry
    /// no ETA.
    pub fn new(backend: Arc<B>, default_eta_seconds: f64) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            backend,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            configs: HashMap::new(),
            default_eta_seconds,
            cancel: CancellationToken::new(),
        })
    }

    /// Create a manager with explicit per-kind resolver configuration.
    pub fn with_configs(
        backend: Arc<B>,
        default_eta_seconds: f64,
        configs: HashMap<WorkflowKind, ResolverConfig>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            backend,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            configs,
            default_eta_seconds,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to events from every job.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// IDs of jobs that have not reached a terminal outcome yet.
    pub async fn active_jobs(&self) -> Vec<JobId> {
        self.jobs.read().await.keys().copied().collect()
    }

    /// Latest state of a running job.
    pub async fn job_state(&self, job_id: JobId) -> Option<ResolverState> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|job| job.state.borrow().clone())
    }

    /// Submit a generation request and start resolving it.
    ///
    /// Returns the client-side job id; progress and the terminal outcome
    /// arrive on [`subscribe`](Self::subscribe).
    pub async fn submit(
        &self,
        kind: WorkflowKind,
        request: &serde_json::Value,
    ) -> Result<JobId, ManagerError> {
        if self.cancel.is_cancelled() {
            return Err(ManagerError::ShutDown);
        }

        let response = self.backend.submit(kind.submit_path(), request).await?;
        let outcome = response.into_outcome(self.default_eta_seconds)?;

        tracing::info!(
            job_id = %outcome.job_id(),
            kind = kind.label(),
            deferred = matches!(outcome, SubmissionOutcome::Deferred(_)),
            "Generation job submitted",
        );

        self.track(kind, outcome).await
    }

    /// Start resolving an already-known descriptor.
    pub async fn track_descriptor(
        &self,
        kind: WorkflowKind,
        descriptor: JobDescriptor,
    ) -> Result<JobId, ManagerError> {
        self.track(kind, SubmissionOutcome::Deferred(descriptor))
            .await
    }

    /// Start resolving a submission outcome.
    pub async fn track(
        &self,
        kind: WorkflowKind,
        outcome: SubmissionOutcome,
    ) -> Result<JobId, ManagerError> {
        if self.cancel.is_cancelled() {
            return Err(ManagerError::ShutDown);
        }

        let config = self
            .configs
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| ResolverConfig::for_kind(kind));
        let resolver = CompletionResolver::new(Arc::clone(&self.backend), config)
            .with_parent_token(self.cancel.clone());
        let handle = resolver.start(outcome);
        let job_id = handle.job_id();

        // Hold the write lock across spawn so the forwarder's removal
        // cannot run before the insert.
        let mut jobs = self.jobs.write().await;
        let managed = ManagedJob {
            kind,
            canceller: handle.canceller(),
            state: handle.watch_state(),
            task_handle: tokio::spawn(forward_events(
                handle,
                kind,
                self.event_tx.clone(),
                Arc::clone(&self.jobs),
            )),
        };
        jobs.insert(job_id, managed);

        Ok(job_id)
    }

    /// Cancel a running job.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<(), ManagerError> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&job_id).ok_or(ManagerError::JobNotFound(job_id))?;

        if job.canceller.cancel() {
            tracing::info!(job_id = %job_id, kind = job.kind.label(), "Job cancelled");
        }
        Ok(())
    }

    /// Gracefully shut down all jobs.
    ///
    /// Cancels the master token, then waits up to 5 seconds per job for
    /// its terminal event to be forwarded.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down resolver manager");
        self.cancel.cancel();

        let drained: Vec<(JobId, ManagedJob)> = self.jobs.write().await.drain().collect();
        let waits = drained.into_iter().map(|(job_id, job)| async move {
            job.canceller.cancel();
            if tokio::time::timeout(SHUTDOWN_GRACE, job.task_handle)
                .await
                .is_err()
            {
                tracing::warn!(job_id = %job_id, "Job did not stop in time");
            }
        });
        futures::future::join_all(waits).await;

        tracing::info!("Resolver manager shut down complete");
    }
}

/// Re-broadcast one job's events until its terminal outcome, then drop
/// the job from the registry.
async fn forward_events(
    mut handle: ResolverHandle,
    kind: WorkflowKind,
    event_tx: broadcast::Sender<JobEvent>,
    jobs: Arc<RwLock<HashMap<JobId, ManagedJob>>>,
) {
    let job_id = handle.job_id();

    while let Some(event) = handle.next_event().await {
        let terminal = event.is_terminal();
        let _ = event_tx.send(JobEvent {
            job_id,
            kind,
            event,
        });
        if terminal {
            break;
        }
    }

    jobs.write().await.remove(&job_id);
    tracing::debug!(job_id = %job_id, "Job removed from registry");
}
