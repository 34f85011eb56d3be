//! Per-job cancellation and timeout supervision.
//!
//! A [`Supervisor`] owns the job's cancellation token, its hard deadline
//! and an epoch counter. Every asynchronous piece of work captures the
//! epoch when it is scheduled and checks [`Supervisor::is_current`]
//! before touching resolver state, so a round that finishes after
//! teardown is discarded instead of resurrecting the job.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation, deadline and epoch owner for one resolver.
#[derive(Debug)]
pub struct Supervisor {
    epoch: AtomicU64,
    torn_down: AtomicBool,
    cancel: CancellationToken,
    deadline: Instant,
    active_probes: AtomicUsize,
}

impl Supervisor {
    /// Create a supervisor whose token is a child of `parent`, with the
    /// hard ceiling measured from `started`.
    pub fn new(parent: &CancellationToken, started: Instant, ceiling: Duration) -> Self {
        Self {
            epoch: AtomicU64::new(0),
            torn_down: AtomicBool::new(false),
            cancel: parent.child_token(),
            deadline: started
                .checked_add(ceiling)
                .or_else(|| started.checked_add(crate::config::MAX_CEILING))
                .unwrap_or(started),
            active_probes: AtomicUsize::new(0),
        }
    }

    /// Epoch to capture when scheduling work.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Whether work scheduled at `epoch` may still act.
    pub fn is_current(&self, epoch: u64) -> bool {
        !self.torn_down.load(Ordering::Acquire) && self.epoch() == epoch
    }

    /// Instant at which an unresolved job fails with a timeout.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Token cancelled on teardown (or when the parent is cancelled).
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Invalidate every outstanding callback and stop all tracked work.
    ///
    /// Returns `true` only for the call that performed the teardown;
    /// repeated calls are no-ops.
    pub fn tear_down(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cancel.cancel();
        true
    }

    /// Whether [`tear_down`](Self::tear_down) has run.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Requests currently in flight.
    pub fn active_probes(&self) -> usize {
        self.active_probes.load(Ordering::Acquire)
    }

    /// Count a request as in flight until the guard drops.
    pub fn track_probe(self: &Arc<Self>) -> ProbeGuard {
        self.active_probes.fetch_add(1, Ordering::AcqRel);
        ProbeGuard {
            supervisor: Arc::clone(self),
        }
    }
}

/// Decrements the in-flight counter when dropped, including on abort.
#[derive(Debug)]
pub struct ProbeGuard {
    supervisor: Arc<Supervisor>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.supervisor.active_probes.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cloneable handle that cancels one job.
#[derive(Debug, Clone)]
pub struct Canceller {
    supervisor: Arc<Supervisor>,
}

impl Canceller {
    pub(crate) fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    /// Request cancellation. Idempotent; returns `true` if this call
    /// actually cancelled the job.
    pub fn cancel(&self) -> bool {
        self.supervisor.tear_down()
    }

    pub fn is_cancelled(&self) -> bool {
        self.supervisor.is_torn_down()
    }
}
