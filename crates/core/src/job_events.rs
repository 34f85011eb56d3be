//! Message type constants for generation job events.
//!
//! Used by the resolver's `JobEvent::to_message` when rendering job
//! lifecycle updates for the presentation layer.

/// Progress update while the job is still running (percentage + ETA).
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// Job resolved to an artifact URL.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed (backend failure or ceiling timeout).
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// Job was cancelled by the user or during shutdown.
pub const MSG_TYPE_JOB_CANCELLED: &str = "job_cancelled";
