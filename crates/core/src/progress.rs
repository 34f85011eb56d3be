//! Time-based progress estimation for jobs that report no progress of
//! their own.
//!
//! The backend only hands out an ETA, so progress is a linear ramp over
//! elapsed time, capped below 100 until the artifact is actually found.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Highest percentage shown while the job is unresolved.
pub const MAX_PENDING_PERCENT: u8 = 97;

/// Percentage shown once the job has resolved.
pub const COMPLETE_PERCENT: u8 = 100;

/// Milliseconds per second (1000.0).
const MILLIS_PER_SEC: f64 = 1000.0;

// ---------------------------------------------------------------------------
// Pure estimator
// ---------------------------------------------------------------------------

/// Estimate completion percentage from elapsed wall time and the backend
/// ETA.
///
/// `percent = min(97, elapsed / (eta * 1000) * 100)`. A non-positive or
/// non-finite ETA yields `0`.
pub fn estimate_percent(elapsed_millis: u64, eta_seconds: f64) -> u8 {
    if !eta_seconds.is_finite() || eta_seconds <= 0.0 {
        return 0;
    }
    let raw = elapsed_millis as f64 / (eta_seconds * MILLIS_PER_SEC) * 100.0;
    raw.floor().clamp(0.0, f64::from(MAX_PENDING_PERCENT)) as u8
}

/// Whole seconds left until the ETA, saturating at zero.
pub fn eta_remaining_seconds(elapsed_millis: u64, eta_seconds: f64) -> u64 {
    let eta_millis = (eta_seconds.max(0.0) * MILLIS_PER_SEC) as u64;
    eta_millis.saturating_sub(elapsed_millis).div_ceil(1000)
}

// ---------------------------------------------------------------------------
// Update payload
// ---------------------------------------------------------------------------

/// Progress snapshot handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Completion percentage (0-100).
    pub percent: u8,
    /// Seconds left until the ETA, if the job is still running.
    pub eta_remaining_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// Monotonic tracker
// ---------------------------------------------------------------------------

/// Holds the last shown percentage and refuses to move it backwards.
///
/// The estimate itself is monotonic in elapsed time, but ticks can be
/// delivered late or out of order relative to the clock, so the tracker
/// keeps the displayed value non-decreasing regardless.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    percent: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently displayed percentage.
    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Recompute from elapsed time. Returns the new value only when it
    /// moved forward.
    pub fn advance(&mut self, elapsed_millis: u64, eta_seconds: f64) -> Option<u8> {
        let next = estimate_percent(elapsed_millis, eta_seconds);
        if next > self.percent {
            self.percent = next;
            Some(next)
        } else {
            None
        }
    }

    /// Snap to 100 once the artifact is available.
    pub fn complete(&mut self) -> u8 {
        self.percent = COMPLETE_PERCENT;
        self.percent
    }

    /// Drop back to 0 after a failure or cancellation.
    pub fn reset(&mut self) {
        self.percent = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
