//! Events emitted by resolvers for the presentation layer.

use genwatch_core::job::WorkflowKind;
use genwatch_core::job_events::{
    MSG_TYPE_JOB_CANCELLED, MSG_TYPE_JOB_COMPLETED, MSG_TYPE_JOB_FAILED, MSG_TYPE_JOB_PROGRESS,
};
use genwatch_core::progress::ProgressUpdate;
use genwatch_core::types::JobId;
use serde::Serialize;

use crate::state::TerminalOutcome;

/// Something a single resolver reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResolverEvent {
    /// The estimated percentage moved forward.
    Progress(ProgressUpdate),
    /// The job ended. Sent exactly once, always last.
    Terminal(TerminalOutcome),
}

impl ResolverEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// A resolver event tagged with the job it belongs to, as broadcast by
/// the [`ResolverManager`](crate::manager::ResolverManager).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: WorkflowKind,
    pub event: ResolverEvent,
}

impl JobEvent {
    /// Render the flat JSON message sent to connected clients.
    pub fn to_message(&self) -> serde_json::Value {
        match &self.event {
            ResolverEvent::Progress(update) => serde_json::json!({
                "type": MSG_TYPE_JOB_PROGRESS,
                "job_id": self.job_id,
                "kind": self.kind,
                "percent": update.percent,
                "eta_remaining_seconds": update.eta_remaining_seconds,
            }),
            ResolverEvent::Terminal(TerminalOutcome::Resolved {
                artifact_url,
                elapsed_seconds,
            }) => serde_json::json!({
                "type": MSG_TYPE_JOB_COMPLETED,
                "job_id": self.job_id,
                "kind": self.kind,
                "artifact_url": artifact_url,
                "elapsed_seconds": elapsed_seconds,
            }),
            ResolverEvent::Terminal(TerminalOutcome::Failed {
                reason,
                fallback_links,
            }) => serde_json::json!({
                "type": MSG_TYPE_JOB_FAILED,
                "job_id": self.job_id,
                "kind": self.kind,
                "error": reason.to_string(),
                "fallback_links": fallback_links,
            }),
            ResolverEvent::Terminal(TerminalOutcome::Cancelled) => serde_json::json!({
                "type": MSG_TYPE_JOB_CANCELLED,
                "job_id": self.job_id,
                "kind": self.kind,
            }),
        }
    }
}
