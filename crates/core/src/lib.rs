//! Shared domain types for generation job tracking.
//!
//! Holds the wire envelopes returned by the generation backend, the
//! immutable [`job::JobDescriptor`], the pure progress estimator and the
//! message constants used when forwarding job events to clients.

pub mod error;
pub mod job;
pub mod job_events;
pub mod progress;
pub mod types;
