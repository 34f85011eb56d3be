//! Resolver phases, observable state and terminal outcomes.

use std::fmt;

use genwatch_core::types::Timestamp;
use serde::Serialize;

/// Lifecycle phase of a single resolver.
///
/// ```text
/// Idle ──► Aggressive ──► Regular ──┬──► Resolved
///   │                               ├──► Failed
///   └──────── (immediate) ──────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting out the grace delay before the first round.
    Idle,
    /// Fast rounds right after the grace delay.
    Aggressive,
    /// Slower rounds once the fast budget is spent.
    Regular,
    Resolved,
    Failed,
    Cancelled,
}

impl Phase {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of a resolver, published on every change.
#[derive(Debug, Clone, Serialize)]
pub struct ResolverState {
    pub phase: Phase,
    pub started_at: Timestamp,
    /// Backend ETA; `None` for jobs that resolved at submission.
    pub eta_seconds: Option<f64>,
    /// Completion percentage (0-100).
    pub progress_percent: u8,
    /// Probe or poll requests currently in flight.
    pub active_probes: usize,
    /// Polling rounds completed so far.
    pub rounds: u32,
}

/// Where a readiness signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeSource {
    FutureLink,
    FetchUrl,
}

/// Result of checking one source during a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub source: ProbeSource,
    pub ready: bool,
    pub artifact_url: Option<String>,
    /// Transport or status detail, for logging only.
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn ready(source: ProbeSource, artifact_url: String) -> Self {
        Self {
            source,
            ready: true,
            artifact_url: Some(artifact_url),
            error: None,
        }
    }

    pub fn not_ready(source: ProbeSource, error: Option<String>) -> Self {
        Self {
            source,
            ready: false,
            artifact_url: None,
            error,
        }
    }
}

/// Why a job ended in [`TerminalOutcome::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// The hard ceiling elapsed without a ready signal.
    Timeout,
    /// The fetch URL reported `failed` or `error`.
    Backend(String),
    /// The resolver task itself died.
    Internal(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Backend(message) => f.write_str(message),
            Self::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

/// The single final result of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Resolved {
        artifact_url: String,
        elapsed_seconds: f64,
    },
    Failed {
        reason: FailureReason,
        /// Direct links the UI can offer when the wait gave up.
        fallback_links: Vec<String>,
    },
    Cancelled,
}

impl TerminalOutcome {
    /// Phase the resolver settles in for this outcome.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Resolved { .. } => Phase::Resolved,
            Self::Failed { .. } => Phase::Failed,
            Self::Cancelled => Phase::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered_along_the_lifecycle() {
        assert!(Phase::Idle < Phase::Aggressive);
        assert!(Phase::Aggressive < Phase::Regular);
        assert!(Phase::Regular < Phase::Resolved);
        assert!(!Phase::Regular.is_terminal());
        assert!(Phase::Cancelled.is_terminal());
    }

    #[test]
    fn failure_reason_display() {
        assert_eq!(FailureReason::Timeout.to_string(), "timeout");
        assert_eq!(FailureReason::Backend("OOM".into()).to_string(), "OOM");
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = TerminalOutcome::Failed {
            reason: FailureReason::Timeout,
            fallback_links: vec!["https://x/a.glb".into()],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"]["kind"], "timeout");
        assert_eq!(json["fallback_links"][0], "https://x/a.glb");
    }
}
