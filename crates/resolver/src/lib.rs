//! Completion resolver for long-running generation jobs.
//!
//! The generation backend has no push channel, so completion is
//! discovered by probing speculative output links and polling the
//! authoritative fetch URL. This crate provides the HTTP client, the
//! per-job resolver state machine, its cancellation supervisor, a
//! bounded retry helper and a manager that runs many jobs side by side.

pub mod api;
pub mod backend;
pub mod config;
pub mod events;
pub mod manager;
pub mod poller;
pub mod prober;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod supervisor;

pub use backend::CompletionBackend;
pub use config::ResolverConfig;
pub use events::{JobEvent, ResolverEvent};
pub use manager::ResolverManager;
pub use resolver::{CompletionResolver, ResolverHandle};
pub use state::{FailureReason, Phase, ResolverState, TerminalOutcome};
