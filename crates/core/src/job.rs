//! Generation job envelopes and the immutable job descriptor.
//!
//! The backend answers a submission either with a finished result or with
//! a processing descriptor (`fetchUrl`, `futureLinks`, `eta`). Status
//! polls return the same envelope shape with a definitive `status`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::JobId;

// ---------------------------------------------------------------------------
// Workflow kinds
// ---------------------------------------------------------------------------

/// The generative workflows that share the completion resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    #[serde(rename = "text_to_3d")]
    TextTo3d,
    Deepfake,
    Music,
}

impl WorkflowKind {
    /// Default hard-ceiling multiplier applied to the ETA.
    ///
    /// The three workflows historically used different values and are
    /// kept apart until product decides on one.
    pub fn default_ceiling_multiplier(self) -> f64 {
        match self {
            Self::TextTo3d => 5.0,
            Self::Deepfake => 3.0,
            Self::Music => 3.0,
        }
    }

    /// Submission path relative to the generation API base URL.
    pub fn submit_path(self) -> &'static str {
        match self {
            Self::TextTo3d => "/text_to_3d",
            Self::Deepfake => "/deepfake/single_video_swap",
            Self::Music => "/music_gen",
        }
    }

    /// Human-readable label for logs and the UI.
    pub fn label(self) -> &'static str {
        match self {
            Self::TextTo3d => "Text to 3D",
            Self::Deepfake => "Face swap",
            Self::Music => "Music",
        }
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text_to_3d" | "text-to-3d" | "3d" => Ok(Self::TextTo3d),
            "deepfake" | "face_swap" => Ok(Self::Deepfake),
            "music" => Ok(Self::Music),
            other => Err(CoreError::Validation(format!(
                "unknown workflow kind '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire envelopes
// ---------------------------------------------------------------------------

/// `status` field shared by submission and status-poll responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Success,
    Processing,
    Failed,
    Error,
    /// Anything the backend sends that we do not recognise.
    #[serde(other)]
    Unknown,
}

impl GenerationStatus {
    /// `failed` and `error` both mean the backend gave up on the job.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

/// Body returned by the authoritative fetch URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEnvelope {
    pub status: GenerationStatus,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default, alias = "generation_time")]
    pub generation_time: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusEnvelope {
    /// First output URL, if any non-empty one is present.
    pub fn first_output(&self) -> Option<&str> {
        self.output
            .first()
            .map(String::as_str)
            .filter(|url| !url.trim().is_empty())
    }
}

/// Body returned by a submission request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub status: GenerationStatus,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default, alias = "generation_time")]
    pub generation_time: Option<f64>,
    #[serde(default, alias = "fetch_url", alias = "fetch_result")]
    pub fetch_url: Option<String>,
    #[serde(default, alias = "future_links")]
    pub future_links: Vec<String>,
    #[serde(default)]
    pub eta: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// What a submission turned into once interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// The backend finished synchronously.
    Immediate {
        job_id: JobId,
        artifact_url: String,
        generation_time: Option<f64>,
    },
    /// The backend is still working; completion must be discovered.
    Deferred(JobDescriptor),
}

impl SubmissionOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Immediate { job_id, .. } => *job_id,
            Self::Deferred(descriptor) => descriptor.job_id(),
        }
    }
}

impl SubmissionResponse {
    /// Interpret the response, assigning a fresh [`JobId`].
    ///
    /// `default_eta_seconds` is used when a processing response carries no
    /// ETA at all. An explicit non-positive ETA is rejected.
    pub fn into_outcome(self, default_eta_seconds: f64) -> Result<SubmissionOutcome, CoreError> {
        let job_id = uuid::Uuid::new_v4();

        match self.status {
            GenerationStatus::Success => {
                let artifact_url = self
                    .output
                    .into_iter()
                    .find(|url| !url.trim().is_empty())
                    .ok_or_else(|| {
                        CoreError::Validation("success response without output".into())
                    })?;
                Ok(SubmissionOutcome::Immediate {
                    job_id,
                    artifact_url,
                    generation_time: self.generation_time,
                })
            }
            GenerationStatus::Processing => {
                let fetch_url = self.fetch_url.ok_or_else(|| {
                    CoreError::Validation("processing response without fetch URL".into())
                })?;
                let eta = self.eta.unwrap_or(default_eta_seconds);
                let descriptor = JobDescriptor::new(job_id, fetch_url, self.future_links, eta)?;
                Ok(SubmissionOutcome::Deferred(descriptor))
            }
            status if status.is_failure() => Err(CoreError::Rejected(
                self.message.unwrap_or_else(|| "unknown error".into()),
            )),
            _ => Err(CoreError::Validation(
                "submission response has an unrecognised status".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Job descriptor
// ---------------------------------------------------------------------------

/// Everything the resolver needs to discover completion of one job.
///
/// Immutable once built; the constructor enforces `eta_seconds > 0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDescriptor {
    job_id: JobId,
    fetch_url: String,
    future_links: Vec<String>,
    eta_seconds: f64,
}

impl JobDescriptor {
    pub fn new(
        job_id: JobId,
        fetch_url: impl Into<String>,
        future_links: Vec<String>,
        eta_seconds: f64,
    ) -> Result<Self, CoreError> {
        let fetch_url = fetch_url.into();
        if fetch_url.trim().is_empty() {
            return Err(CoreError::Validation("fetch URL must not be empty".into()));
        }
        if !eta_seconds.is_finite() || eta_seconds <= 0.0 {
            return Err(CoreError::Validation(format!(
                "ETA must be a positive number of seconds, got {eta_seconds}"
            )));
        }
        let future_links = future_links
            .into_iter()
            .filter(|link| !link.trim().is_empty())
            .collect();

        Ok(Self {
            job_id,
            fetch_url,
            future_links,
            eta_seconds,
        })
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn fetch_url(&self) -> &str {
        &self.fetch_url
    }

    pub fn future_links(&self) -> &[String] {
        &self.future_links
    }

    pub fn eta_seconds(&self) -> f64 {
        self.eta_seconds
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
