//! `genwatch-worker` -- submit one generation request and wait for it.
//!
//! Reads a JSON request body from disk, submits it to the generation
//! API, follows the job through the completion resolver and, on
//! success, downloads the artifact. Ctrl-C cancels the job.
//!
//! See [`WorkerConfig::from_env`] for the environment variables.

use std::sync::Arc;

use anyhow::Context;
use genwatch_resolver::api::GenerationApi;
use genwatch_resolver::retry::RetryConfig;
use genwatch_resolver::{ResolverManager, TerminalOutcome};
use genwatch_worker::config::WorkerConfig;
use genwatch_worker::job::{download_artifact, run_job};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genwatch_worker=info,genwatch_resolver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env()?;

    let raw = tokio::fs::read_to_string(&config.request_path)
        .await
        .with_context(|| format!("reading {}", config.request_path.display()))?;
    let request: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", config.request_path.display()))?;

    tracing::info!(
        api_url = %config.api_url,
        kind = config.kind.label(),
        request = %config.request_path.display(),
        "Starting genwatch-worker",
    );

    let api = Arc::new(GenerationApi::new(
        config.api_url.clone(),
        config.api_key.clone(),
    ));
    let manager = ResolverManager::with_configs(
        Arc::clone(&api),
        config.default_eta_secs,
        config.resolver_configs(),
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, cancelling");
                cancel.cancel();
            }
        }
    });

    let outcome = run_job(&manager, config.kind, &request, &cancel).await;
    manager.shutdown().await;

    match outcome? {
        TerminalOutcome::Resolved {
            artifact_url,
            elapsed_seconds,
        } => {
            tracing::info!(%artifact_url, elapsed_seconds, "Generation complete");
            if let Some(path) = &config.output_path {
                let bytes =
                    download_artifact(&api, &artifact_url, &RetryConfig::default(), &cancel)
                        .await?;
                tokio::fs::write(path, &bytes)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                tracing::info!(path = %path.display(), size = bytes.len(), "Artifact saved");
            }
            Ok(())
        }
        TerminalOutcome::Failed {
            reason,
            fallback_links,
        } => {
            tracing::error!(%reason, ?fallback_links, "Generation failed");
            anyhow::bail!("generation failed: {reason}")
        }
        TerminalOutcome::Cancelled => {
            tracing::info!("Generation cancelled");
            Ok(())
        }
    }
}
