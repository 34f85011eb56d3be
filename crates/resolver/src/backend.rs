//! Transport seam between the resolver and the generation backend.
//!
//! [`GenerationApi`](crate::api::GenerationApi) is the production
//! implementation; tests substitute scripted backends.

use async_trait::async_trait;
use genwatch_core::job::{StatusEnvelope, SubmissionResponse};

use crate::api::GenerationApiError;

/// Operations the resolver and manager need from the backend.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Submit a generation request to `path` (relative to the API base).
    async fn submit(
        &self,
        path: &str,
        request: &serde_json::Value,
    ) -> Result<SubmissionResponse, GenerationApiError>;

    /// Issue a HEAD request and return the raw status code.
    async fn head(&self, url: &str) -> Result<u16, GenerationApiError>;

    /// Fetch the status envelope from a job's fetch URL.
    async fn fetch_status(&self, fetch_url: &str) -> Result<StatusEnvelope, GenerationApiError>;
}
