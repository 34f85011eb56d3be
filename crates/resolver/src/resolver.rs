//! The per-job completion resolver.
//!
//! [`CompletionResolver::spawn`] starts two tasks for a
//! [`JobDescriptor`]:
//!
//! - the **resolver task**, the only owner of the job's state. It runs a
//!   `select!` loop over cancellation, the hard deadline, round reports
//!   and the progress ticker, and emits exactly one terminal outcome;
//! - the **round driver**, which waits out the grace delay and then runs
//!   probe/poll rounds on the aggressive and regular cadences, reporting
//!   each round back over a capacity-1 channel.
//!
//! Every report carries the epoch captured when the driver was spawned.
//! Once the [`Supervisor`] tears the job down, stale reports are dropped
//! and the driver is aborted.

use std::sync::Arc;

use genwatch_core::job::{JobDescriptor, SubmissionOutcome};
use genwatch_core::progress::{eta_remaining_seconds, ProgressTracker, ProgressUpdate};
use genwatch_core::types::JobId;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backend::CompletionBackend;
use crate::config::ResolverConfig;
use crate::events::ResolverEvent;
use crate::poller::{PollOutcome, StatusPoller};
use crate::prober::AvailabilityProber;
use crate::state::{FailureReason, Phase, ProbeResult, ResolverState, TerminalOutcome};
use crate::supervisor::{Canceller, Supervisor};

// ---------------------------------------------------------------------------
// Resolver factory
// ---------------------------------------------------------------------------

/// Starts resolvers against one backend with one configuration.
pub struct CompletionResolver<B: ?Sized> {
    backend: Arc<B>,
    config: ResolverConfig,
    parent: CancellationToken,
}

impl<B: CompletionBackend + ?Sized + 'static> CompletionResolver<B> {
    pub fn new(backend: Arc<B>, config: ResolverConfig) -> Self {
        Self {
            backend,
            config,
            parent: CancellationToken::new(),
        }
    }

    /// Make every spawned job's token a child of `parent`, so cancelling
    /// the parent cancels all of them.
    pub fn with_parent_token(mut self, parent: CancellationToken) -> Self {
        self.parent = parent;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Start tracking whatever a submission turned into.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, outcome: SubmissionOutcome) -> ResolverHandle {
        match outcome {
            SubmissionOutcome::Immediate {
                job_id,
                artifact_url,
                generation_time,
            } => self.resolve_immediate(job_id, artifact_url, generation_time),
            SubmissionOutcome::Deferred(descriptor) => self.spawn(descriptor),
        }
    }

    /// Build an already-resolved handle for a synchronous result.
    ///
    /// No rounds run; the handle yields `Progress(100)` followed by
    /// `Resolved`.
    pub fn resolve_immediate(
        &self,
        job_id: JobId,
        artifact_url: String,
        generation_time: Option<f64>,
    ) -> ResolverHandle {
        let supervisor = Arc::new(Supervisor::new(
            &self.parent,
            Instant::now(),
            std::time::Duration::ZERO,
        ));
        supervisor.tear_down();

        let outcome = TerminalOutcome::Resolved {
            artifact_url,
            elapsed_seconds: generation_time.unwrap_or(0.0),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(ResolverEvent::Progress(ProgressUpdate {
            percent: genwatch_core::progress::COMPLETE_PERCENT,
            eta_remaining_seconds: None,
        }));
        let _ = events_tx.send(ResolverEvent::Terminal(outcome.clone()));

        let (_state_tx, state_rx) = watch::channel(ResolverState {
            phase: Phase::Resolved,
            started_at: chrono::Utc::now(),
            eta_seconds: None,
            progress_percent: genwatch_core::progress::COMPLETE_PERCENT,
            active_probes: 0,
            rounds: 0,
        });

        tracing::info!(job_id = %job_id, "Job resolved immediately");

        ResolverHandle {
            job_id,
            events: events_rx,
            state: state_rx,
            canceller: Canceller::new(supervisor),
            task: Some(tokio::spawn(async move { outcome })),
        }
    }

    /// Spawn a resolver for a deferred job.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(&self, descriptor: JobDescriptor) -> ResolverHandle {
        let job_id = descriptor.job_id();
        let started = Instant::now();
        let ceiling = self.config.ceiling_for(descriptor.eta_seconds());
        let supervisor = Arc::new(Supervisor::new(&self.parent, started, ceiling));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ResolverState {
            phase: Phase::Idle,
            started_at: chrono::Utc::now(),
            eta_seconds: Some(descriptor.eta_seconds()),
            progress_percent: 0,
            active_probes: 0,
            rounds: 0,
        });

        tracing::info!(
            job_id = %job_id,
            eta_seconds = descriptor.eta_seconds(),
            ceiling_secs = ceiling.as_secs_f64(),
            future_links = descriptor.future_links().len(),
            "Resolver started",
        );

        let task = ResolverTask {
            descriptor: Arc::new(descriptor),
            config: self.config.clone(),
            backend: Arc::clone(&self.backend),
            supervisor: Arc::clone(&supervisor),
            events: events_tx,
            state: state_tx,
            started,
            progress: ProgressTracker::new(),
        };

        ResolverHandle {
            job_id,
            events: events_rx,
            state: state_rx,
            canceller: Canceller::new(supervisor),
            task: Some(tokio::spawn(task.run())),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Owner-side view of one running job.
///
/// Dropping the handle cancels the job, so a resolver can never outlive
/// the component that started it.
pub struct ResolverHandle {
    job_id: JobId,
    events: mpsc::UnboundedReceiver<ResolverEvent>,
    state: watch::Receiver<ResolverState>,
    canceller: Canceller,
    task: Option<JoinHandle<TerminalOutcome>>,
}

impl ResolverHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Latest state snapshot.
    pub fn state(&self) -> ResolverState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ResolverState> {
        self.state.clone()
    }

    /// A cloneable handle for cancelling from elsewhere.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Request cancellation; see [`Canceller::cancel`].
    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    /// Next progress or terminal event. Returns `None` once the terminal
    /// event has been consumed and the resolver has exited.
    pub async fn next_event(&mut self) -> Option<ResolverEvent> {
        self.events.recv().await
    }

    /// Wait for the terminal outcome, discarding unread events.
    pub async fn wait(mut self) -> TerminalOutcome {
        let Some(task) = self.task.take() else {
            return TerminalOutcome::Cancelled;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Resolver task ended abnormally");
                TerminalOutcome::Failed {
                    reason: FailureReason::Internal(e.to_string()),
                    fallback_links: Vec::new(),
                }
            }
        }
    }
}

impl Drop for ResolverHandle {
    fn drop(&mut self) {
        if self.canceller.cancel() {
            tracing::debug!(job_id = %self.job_id, "Resolver handle dropped, job cancelled");
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver task
// ---------------------------------------------------------------------------

/// Message from the round driver to the resolver task.
#[derive(Debug)]
struct DriverReport {
    epoch: u64,
    kind: ReportKind,
}

#[derive(Debug)]
enum ReportKind {
    Phase(Phase),
    Round { round: u32, outcome: RoundOutcome },
}

/// Combined verdict of one probe/poll round.
#[derive(Debug)]
enum RoundOutcome {
    Ready(ProbeResult),
    Pending,
    Failed(String),
}

impl From<PollOutcome> for RoundOutcome {
    fn from(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Ready(result) => Self::Ready(result),
            PollOutcome::Pending => Self::Pending,
            PollOutcome::Failed(message) => Self::Failed(message),
        }
    }
}

/// Sole owner of one job's mutable state.
struct ResolverTask<B: ?Sized> {
    descriptor: Arc<JobDescriptor>,
    config: ResolverConfig,
    backend: Arc<B>,
    supervisor: Arc<Supervisor>,
    events: mpsc::UnboundedSender<ResolverEvent>,
    state: watch::Sender<ResolverState>,
    started: Instant,
    progress: ProgressTracker,
}

impl<B: CompletionBackend + ?Sized + 'static> ResolverTask<B> {
    async fn run(mut self) -> TerminalOutcome {
        let epoch = self.supervisor.epoch();
        let token = self.supervisor.token().clone();

        let (report_tx, mut report_rx) = mpsc::channel(1);
        let driver = RoundDriver {
            prober: AvailabilityProber::new(Arc::clone(&self.backend), Arc::clone(&self.supervisor))
                .with_timeout(self.config.request_timeout),
            poller: StatusPoller::new(Arc::clone(&self.backend), Arc::clone(&self.supervisor))
                .with_timeout(self.config.request_timeout),
            descriptor: Arc::clone(&self.descriptor),
            config: self.config.clone(),
            supervisor: Arc::clone(&self.supervisor),
            epoch,
        };
        let driver_handle = tokio::spawn(driver.drive(report_tx));

        let mut ticker = tokio::time::interval(self.config.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let deadline = tokio::time::sleep_until(self.supervisor.deadline());
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break TerminalOutcome::Cancelled,
                _ = &mut deadline => {
                    tracing::warn!(job_id = %self.descriptor.job_id(), "Ceiling reached without a result");
                    break self.failed(FailureReason::Timeout);
                }
                report = report_rx.recv() => match report {
                    Some(report) => {
                        if let Some(outcome) = self.handle_report(report) {
                            break outcome;
                        }
                    }
                    None => {
                        break self.failed(FailureReason::Internal("round driver stopped".into()));
                    }
                },
                _ = ticker.tick() => self.tick_progress(epoch),
            }
        };

        driver_handle.abort();
        self.finish(outcome)
    }

    fn handle_report(&mut self, report: DriverReport) -> Option<TerminalOutcome> {
        let job_id = self.descriptor.job_id();
        if !self.supervisor.is_current(report.epoch) {
            tracing::debug!(job_id = %job_id, "Discarding stale round report");
            return None;
        }

        match report.kind {
            ReportKind::Phase(phase) => {
                tracing::debug!(job_id = %job_id, ?phase, "Resolver phase change");
                self.state.send_modify(|state| {
                    if phase > state.phase {
                        state.phase = phase;
                    }
                });
                None
            }
            ReportKind::Round { round, outcome } => {
                self.state.send_modify(|state| state.rounds = round);
                match outcome {
                    RoundOutcome::Ready(result) => {
                        let artifact_url = result.artifact_url.unwrap_or_default();
                        tracing::info!(
                            job_id = %job_id,
                            round,
                            source = ?result.source,
                            artifact_url = %artifact_url,
                            "Artifact available",
                        );
                        Some(TerminalOutcome::Resolved {
                            artifact_url,
                            elapsed_seconds: self.started.elapsed().as_secs_f64(),
                        })
                    }
                    RoundOutcome::Failed(message) => {
                        tracing::warn!(job_id = %job_id, round, message = %message, "Backend reported failure");
                        Some(self.failed(FailureReason::Backend(message)))
                    }
                    RoundOutcome::Pending => {
                        tracing::trace!(job_id = %job_id, round, "Round finished without result");
                        None
                    }
                }
            }
        }
    }

    fn tick_progress(&mut self, epoch: u64) {
        if !self.supervisor.is_current(epoch) {
            return;
        }
        let elapsed = self.started.elapsed().as_millis() as u64;
        let eta = self.descriptor.eta_seconds();
        let active_probes = self.supervisor.active_probes();

        match self.progress.advance(elapsed, eta) {
            Some(percent) => {
                self.state.send_modify(|state| {
                    state.progress_percent = percent;
                    state.active_probes = active_probes;
                });
                let _ = self.events.send(ResolverEvent::Progress(ProgressUpdate {
                    percent,
                    eta_remaining_seconds: Some(eta_remaining_seconds(elapsed, eta)),
                }));
            }
            None => {
                self.state.send_if_modified(|state| {
                    let changed = state.active_probes != active_probes;
                    state.active_probes = active_probes;
                    changed
                });
            }
        }
    }

    fn failed(&self, reason: FailureReason) -> TerminalOutcome {
        TerminalOutcome::Failed {
            reason,
            fallback_links: self.descriptor.future_links().to_vec(),
        }
    }

    /// Tear down and publish the terminal outcome.
    ///
    /// Teardown is the arbiter: if a cancel request tore the job down
    /// first, the outcome becomes `Cancelled` whatever the loop decided.
    fn finish(mut self, outcome: TerminalOutcome) -> TerminalOutcome {
        let won = self.supervisor.tear_down();
        let outcome = match outcome {
            TerminalOutcome::Cancelled => TerminalOutcome::Cancelled,
            decided if won => decided,
            _ => TerminalOutcome::Cancelled,
        };

        let percent = match outcome {
            TerminalOutcome::Resolved { .. } => {
                let percent = self.progress.complete();
                let _ = self.events.send(ResolverEvent::Progress(ProgressUpdate {
                    percent,
                    eta_remaining_seconds: None,
                }));
                percent
            }
            _ => {
                self.progress.reset();
                self.progress.percent()
            }
        };

        let phase = outcome.phase();
        self.state.send_modify(|state| {
            state.phase = phase;
            state.progress_percent = percent;
            state.active_probes = 0;
        });

        tracing::info!(
            job_id = %self.descriptor.job_id(),
            ?phase,
            elapsed_secs = self.started.elapsed().as_secs_f64(),
            "Resolver finished",
        );

        let _ = self.events.send(ResolverEvent::Terminal(outcome.clone()));
        outcome
    }
}

// ---------------------------------------------------------------------------
// Round driver
// ---------------------------------------------------------------------------

/// Schedules probe/poll rounds and reports them to the resolver task.
struct RoundDriver<B: ?Sized> {
    prober: AvailabilityProber<B>,
    poller: StatusPoller<B>,
    descriptor: Arc<JobDescriptor>,
    config: ResolverConfig,
    supervisor: Arc<Supervisor>,
    epoch: u64,
}

impl<B: CompletionBackend + ?Sized> RoundDriver<B> {
    async fn drive(self, reports: mpsc::Sender<DriverReport>) {
        let token = self.supervisor.token().clone();

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(self.config.grace_period) => {}
        }

        let first_phase = if self.config.aggressive_rounds > 0 {
            Phase::Aggressive
        } else {
            Phase::Regular
        };
        if !self.report(&reports, ReportKind::Phase(first_phase)).await {
            return;
        }

        let mut completed = 0u32;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.config.interval_after(completed)) => {}
            }

            // Holding the only slot means the previous report was consumed.
            let Ok(permit) = reports.reserve().await else {
                return;
            };
            if !self.supervisor.is_current(self.epoch) {
                return;
            }

            let round = completed + 1;
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                outcome = self.run_round() => outcome,
            };
            permit.send(DriverReport {
                epoch: self.epoch,
                kind: ReportKind::Round { round, outcome },
            });
            completed = round;

            if completed == self.config.aggressive_rounds
                && !self.report(&reports, ReportKind::Phase(Phase::Regular)).await
            {
                return;
            }
        }
    }

    /// Probe future links and poll the fetch URL concurrently.
    ///
    /// A ready future link takes priority over anything the poll says in
    /// the same round, and ends the round without waiting for the poll.
    /// A poll verdict is held until the probes have come back empty.
    async fn run_round(&self) -> RoundOutcome {
        let probe = self.prober.probe_round(self.descriptor.future_links());
        let poll = self.poller.poll(self.descriptor.fetch_url());
        tokio::pin!(probe, poll);

        let mut probes_done = false;
        let mut polled: Option<PollOutcome> = None;
        loop {
            tokio::select! {
                biased;
                ready = &mut probe, if !probes_done => {
                    if let Some(result) = ready {
                        return RoundOutcome::Ready(result);
                    }
                    probes_done = true;
                    if let Some(outcome) = polled.take() {
                        return outcome.into();
                    }
                }
                outcome = &mut poll, if polled.is_none() => {
                    if probes_done {
                        return outcome.into();
                    }
                    polled = Some(outcome);
                }
            }
        }
    }

    async fn report(&self, reports: &mpsc::Sender<DriverReport>, kind: ReportKind) -> bool {
        if !self.supervisor.is_current(self.epoch) {
            return false;
        }
        reports
            .send(DriverReport {
                epoch: self.epoch,
                kind,
            })
            .await
            .is_ok()
    }
}
