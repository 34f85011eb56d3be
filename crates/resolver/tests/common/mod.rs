//! Scripted in-memory backend shared by the resolver integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genwatch_core::job::{GenerationStatus, JobDescriptor, StatusEnvelope, SubmissionResponse};
use genwatch_resolver::api::GenerationApiError;
use genwatch_resolver::CompletionBackend;

/// Scripted reply for a HEAD probe.
#[derive(Debug, Clone, Copy)]
pub enum HeadReply {
    Status(u16),
    TransportError,
    /// Never answers.
    Hang,
}

/// Scripted reply for a status poll.
#[derive(Debug, Clone)]
pub enum StatusReply {
    Processing,
    Success(&'static str),
    SuccessWithoutOutput,
    Failed(Option<&'static str>),
    Error(&'static str),
    TransportError,
    /// Never answers.
    Hang,
}

/// Backend whose replies are queued up front.
///
/// Each queue repeats its last entry once exhausted. Links without a
/// script answer `404`; the fetch URL without a script answers
/// `processing`.
#[derive(Default)]
pub struct ScriptedBackend {
    heads: Mutex<HashMap<String, VecDeque<HeadReply>>>,
    statuses: Mutex<VecDeque<StatusReply>>,
    submission: Mutex<Option<serde_json::Value>>,
    latency: Duration,
    head_calls: AtomicUsize,
    status_calls: AtomicUsize,
    submit_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `url` answers 404 `misses` times, then 200.
    pub fn link_ready_after(self, url: &str, misses: usize) -> Self {
        let mut replies: VecDeque<HeadReply> =
            std::iter::repeat(HeadReply::Status(404)).take(misses).collect();
        replies.push_back(HeadReply::Status(200));
        self.heads.lock().unwrap().insert(url.to_string(), replies);
        self
    }

    /// `url` answers with the given replies in order.
    pub fn link_replies(self, url: &str, replies: Vec<HeadReply>) -> Self {
        self.heads
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
        self
    }

    /// The fetch URL answers with the given replies in order.
    pub fn status_replies(self, replies: Vec<StatusReply>) -> Self {
        *self.statuses.lock().unwrap() = replies.into();
        self
    }

    /// Body returned by `submit`.
    pub fn submission(self, body: serde_json::Value) -> Self {
        *self.submission.lock().unwrap() = Some(body);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.head_calls() + self.status_calls() + self.submit_calls()
    }

    fn next<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn transport_error() -> GenerationApiError {
    GenerationApiError::ApiError {
        status: 502,
        body: "bad gateway".into(),
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn submit(
        &self,
        _path: &str,
        _request: &serde_json::Value,
    ) -> Result<SubmissionResponse, GenerationApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let body = self
            .submission
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(transport_error)?;
        serde_json::from_value(body).map_err(|e| GenerationApiError::Decode(e.to_string()))
    }

    async fn head(&self, url: &str) -> Result<u16, GenerationApiError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let reply = self
            .heads
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(Self::next)
            .unwrap_or(HeadReply::Status(404));
        match reply {
            HeadReply::Status(status) => Ok(status),
            HeadReply::TransportError => Err(transport_error()),
            HeadReply::Hang => std::future::pending().await,
        }
    }

    async fn fetch_status(&self, _fetch_url: &str) -> Result<StatusEnvelope, GenerationApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let reply = {
            let mut statuses = self.statuses.lock().unwrap();
            Self::next(&mut *statuses).unwrap_or(StatusReply::Processing)
        };
        let envelope = |status, output: Vec<String>, message: Option<&str>| StatusEnvelope {
            status,
            output,
            generation_time: None,
            message: message.map(str::to_string),
        };
        match reply {
            StatusReply::Processing => Ok(envelope(GenerationStatus::Processing, vec![], None)),
            StatusReply::Success(url) => Ok(envelope(
                GenerationStatus::Success,
                vec![url.to_string()],
                None,
            )),
            StatusReply::SuccessWithoutOutput => {
                Ok(envelope(GenerationStatus::Success, vec![], None))
            }
            StatusReply::Failed(message) => Ok(envelope(GenerationStatus::Failed, vec![], message)),
            StatusReply::Error(message) => {
                Ok(envelope(GenerationStatus::Error, vec![], Some(message)))
            }
            StatusReply::TransportError => Err(transport_error()),
            StatusReply::Hang => std::future::pending().await,
        }
    }
}

/// Descriptor with the given links and ETA.
pub fn descriptor(links: &[&str], eta_seconds: f64) -> JobDescriptor {
    JobDescriptor::new(
        uuid::Uuid::new_v4(),
        "https://api.example/fetch/1",
        links.iter().map(|l| l.to_string()).collect(),
        eta_seconds,
    )
    .expect("valid descriptor")
}
