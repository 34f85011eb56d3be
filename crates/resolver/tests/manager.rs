//! Multi-job manager: submission, broadcasting, isolation and shutdown.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use genwatch_core::error::CoreError;
use genwatch_core::job::WorkflowKind;
use genwatch_core::types::JobId;
use genwatch_resolver::manager::ManagerError;
use genwatch_resolver::{JobEvent, ResolverEvent, ResolverManager, TerminalOutcome};
use serde_json::json;
use tokio::sync::broadcast;

use common::ScriptedBackend;

fn deferred_submission() -> serde_json::Value {
    json!({
        "status": "processing",
        "fetchUrl": "https://api.example/fetch/1",
        "futureLinks": ["https://x/out.glb"],
        "eta": 20,
    })
}

/// Receive events until the terminal one for `job_id`.
async fn terminal_for(rx: &mut broadcast::Receiver<JobEvent>, job_id: JobId) -> TerminalOutcome {
    loop {
        let event = rx.recv().await.expect("event channel open");
        if event.job_id != job_id {
            continue;
        }
        if let ResolverEvent::Terminal(outcome) = event.event {
            return outcome;
        }
    }
}

/// Wait until the forwarder has dropped `job_id` from the registry.
async fn wait_until_removed<B>(manager: &ResolverManager<B>, job_id: JobId)
where
    B: genwatch_resolver::CompletionBackend + ?Sized + 'static,
{
    while manager.active_jobs().await.contains(&job_id) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn immediate_submission_broadcasts_completion() {
    let backend = ScriptedBackend::new()
        .submission(json!({
            "status": "success",
            "output": ["https://x/song.mp3"],
            "generationTime": 12.5,
        }))
        .into_arc();
    let manager = ResolverManager::new(backend.clone(), 60.0);
    let mut rx = manager.subscribe();

    let job_id = manager
        .submit(WorkflowKind::Music, &json!({"prompt": "lofi"}))
        .await
        .unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.job_id, job_id);
    assert_eq!(first.kind, WorkflowKind::Music);
    assert_matches!(first.event, ResolverEvent::Progress(update) if update.percent == 100);

    let outcome = terminal_for(&mut rx, job_id).await;
    assert_eq!(
        outcome,
        TerminalOutcome::Resolved {
            artifact_url: "https://x/song.mp3".into(),
            elapsed_seconds: 12.5,
        }
    );

    wait_until_removed(&manager, job_id).await;
    assert!(manager.job_state(job_id).await.is_none());
    assert_eq!(backend.head_calls() + backend.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_job_broadcasts_cancelled() {
    let backend = ScriptedBackend::new()
        .submission(deferred_submission())
        .into_arc();
    let manager = ResolverManager::new(backend, 60.0);
    let mut rx = manager.subscribe();

    let job_id = manager
        .submit(WorkflowKind::TextTo3d, &json!({"prompt": "a chair"}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(manager.job_state(job_id).await.is_some());

    manager.cancel_job(job_id).await.unwrap();

    assert_eq!(terminal_for(&mut rx, job_id).await, TerminalOutcome::Cancelled);
    wait_until_removed(&manager, job_id).await;
    assert_matches!(
        manager.cancel_job(job_id).await,
        Err(ManagerError::JobNotFound(id)) if id == job_id
    );
}

#[tokio::test]
async fn cancel_unknown_job_is_an_error() {
    let manager = ResolverManager::new(ScriptedBackend::new().into_arc(), 60.0);
    let unknown = uuid::Uuid::new_v4();

    assert_matches!(
        manager.cancel_job(unknown).await,
        Err(ManagerError::JobNotFound(id)) if id == unknown
    );
}

#[tokio::test(start_paused = true)]
async fn jobs_are_isolated() {
    let backend = ScriptedBackend::new()
        .submission(deferred_submission())
        .into_arc();
    let manager = ResolverManager::new(backend, 60.0);
    let mut rx = manager.subscribe();

    let first = manager
        .submit(WorkflowKind::Deepfake, &json!({}))
        .await
        .unwrap();
    let second = manager
        .submit(WorkflowKind::Deepfake, &json!({}))
        .await
        .unwrap();
    assert_ne!(first, second);

    tokio::time::sleep(Duration::from_secs(5)).await;
    manager.cancel_job(first).await.unwrap();
    assert_eq!(terminal_for(&mut rx, first).await, TerminalOutcome::Cancelled);
    wait_until_removed(&manager, first).await;

    let state = manager.job_state(second).await.expect("second job still running");
    assert!(!state.phase.is_terminal());
    assert_eq!(manager.active_jobs().await, vec![second]);

    manager.cancel_job(second).await.unwrap();
    assert_eq!(terminal_for(&mut rx, second).await, TerminalOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_everything_and_refuses_new_jobs() {
    let backend = ScriptedBackend::new()
        .submission(deferred_submission())
        .into_arc();
    let manager = ResolverManager::new(backend.clone(), 60.0);
    let mut rx = manager.subscribe();

    let a = manager.submit(WorkflowKind::Music, &json!({})).await.unwrap();
    let b = manager.submit(WorkflowKind::Music, &json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    manager.shutdown().await;

    assert_eq!(terminal_for(&mut rx, a).await, TerminalOutcome::Cancelled);
    assert_eq!(terminal_for(&mut rx, b).await, TerminalOutcome::Cancelled);
    assert!(manager.active_jobs().await.is_empty());

    let submits_before = backend.submit_calls();
    assert_matches!(
        manager.submit(WorkflowKind::Music, &json!({})).await,
        Err(ManagerError::ShutDown)
    );
    assert_eq!(backend.submit_calls(), submits_before);
}

#[tokio::test]
async fn rejected_submission_is_reported() {
    let backend = ScriptedBackend::new()
        .submission(json!({"status": "failed", "message": "quota exceeded"}))
        .into_arc();
    let manager = ResolverManager::new(backend, 60.0);

    assert_matches!(
        manager.submit(WorkflowKind::TextTo3d, &json!({})).await,
        Err(ManagerError::InvalidResponse(CoreError::Rejected(msg))) if msg == "quota exceeded"
    );
    assert!(manager.active_jobs().await.is_empty());
}

#[tokio::test]
async fn transport_failure_on_submit_is_reported() {
    // No scripted submission body: the backend answers with a gateway error.
    let manager = ResolverManager::new(ScriptedBackend::new().into_arc(), 60.0);

    assert_matches!(
        manager.submit(WorkflowKind::Music, &json!({})).await,
        Err(ManagerError::SubmitFailed(_))
    );
}

#[test]
fn job_event_message_shape() {
    let event = JobEvent {
        job_id: uuid::Uuid::nil(),
        kind: WorkflowKind::TextTo3d,
        event: ResolverEvent::Terminal(TerminalOutcome::Cancelled),
    };
    let message = event.to_message();
    assert_eq!(message["type"], "job_cancelled");
    assert_eq!(message["kind"], "text_to_3d");
}
