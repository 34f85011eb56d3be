//! REST client for the generation backend.
//!
//! Wraps job submission, status fetches, availability probes and
//! artifact downloads using [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use genwatch_core::job::{StatusEnvelope, SubmissionResponse};

use crate::backend::CompletionBackend;

/// Per-request timeout for submissions, status fetches and probes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for downloading a finished artifact.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP client for one generation backend.
pub struct GenerationApi {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

/// Errors from the generation REST layer.
#[derive(Debug, thiserror::Error)]
pub enum GenerationApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body was not the expected JSON envelope.
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl GenerationApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `https://host/api/v6`.
    /// * `api_key` - Optional key merged into every JSON body as `"key"`.
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_key)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request timeout (not applied to downloads).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Base HTTP URL this client talks to.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Download a resolved artifact.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, GenerationApiError> {
        let response = self.client.get(url).timeout(DOWNLOAD_TIMEOUT).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Merge the API key into a JSON object body.
    fn with_key(&self, body: &serde_json::Value) -> serde_json::Value {
        let mut body = body.clone();
        if let (Some(key), Some(map)) = (&self.api_key, body.as_object_mut()) {
            map.insert("key".into(), serde_json::Value::String(key.clone()));
        }
        body
    }

    /// Resolve `path` against the base URL unless it is already absolute.
    fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.api_url, path.trim_start_matches('/'))
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`GenerationApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GenerationApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GenerationApiError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| GenerationApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CompletionBackend for GenerationApi {
    /// Sends `POST {api_url}{path}` with the request body plus key.
    async fn submit(
        &self,
        path: &str,
        request: &serde_json::Value,
    ) -> Result<SubmissionResponse, GenerationApiError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .timeout(self.request_timeout)
            .json(&self.with_key(request))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Only the status code is consulted; redirects are followed.
    async fn head(&self, url: &str) -> Result<u16, GenerationApiError> {
        let response = self
            .client
            .head(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    /// The fetch endpoint expects a POST carrying the key.
    async fn fetch_status(&self, fetch_url: &str) -> Result<StatusEnvelope, GenerationApiError> {
        let response = self
            .client
            .post(fetch_url)
            .timeout(self.request_timeout)
            .json(&self.with_key(&serde_json::json!({})))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_relative_paths() {
        let api = GenerationApi::new("https://gen.example/api/v6/".into(), None);
        assert_eq!(api.api_url(), "https://gen.example/api/v6");
        assert_eq!(
            api.endpoint("/music_gen"),
            "https://gen.example/api/v6/music_gen"
        );
        assert_eq!(
            api.endpoint("https://other.example/fetch/1"),
            "https://other.example/fetch/1"
        );
    }

    #[test]
    fn key_is_merged_into_object_bodies() {
        let api = GenerationApi::new("https://gen.example".into(), Some("secret".into()));
        let body = api.with_key(&serde_json::json!({"prompt": "a chair"}));
        assert_eq!(body["key"], "secret");
        assert_eq!(body["prompt"], "a chair");
    }

    #[test]
    fn requests_are_bounded_by_default() {
        let api = GenerationApi::new("https://gen.example".into(), None);
        assert_eq!(api.request_timeout(), REQUEST_TIMEOUT);

        let api = api.with_request_timeout(Duration::from_secs(5));
        assert_eq!(api.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn key_is_omitted_when_not_configured() {
        let api = GenerationApi::new("https://gen.example".into(), None);
        let body = api.with_key(&serde_json::json!({"prompt": "a chair"}));
        assert!(body.get("key").is_none());
    }
}
