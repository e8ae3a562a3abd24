//! `dlm run` – start queued tasks and drive the engine until it drains.

use anyhow::Result;
use std::time::Duration;

use dlm_core::engine::Engine;
use dlm_core::events::EngineEvent;
use dlm_core::task::DownloadState;

use super::super::{EXIT_INTERRUPTED, EXIT_OK, EXIT_USER};

pub async fn run(engine: &Engine) -> Result<i32> {
    for task in engine.get_all().await? {
        if matches!(task.state, DownloadState::Queued | DownloadState::Waiting) {
            if let Err(e) = engine.start(&task.id).await {
                tracing::warn!(task = %task.id, "start failed: {e:#}");
            }
        }
    }
    drain(engine).await
}

/// Wait for the engine to go idle, relaying events. Ctrl-C triggers an
/// orderly shutdown and exits 130.
pub async fn drain(engine: &Engine) -> Result<i32> {
    let mut events = engine.events();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupted, draining workers…");
                engine.shutdown().await?;
                return Ok(EXIT_INTERRUPTED);
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                if let Some(rx) = events.as_mut() {
                    while let Ok(event) = rx.try_recv() {
                        report(&event);
                    }
                }
                if engine.is_idle() {
                    break;
                }
            }
        }
    }

    // Surface terminal failures in the exit code.
    let mut failed = 0usize;
    for task in engine.get_all().await? {
        if task.state == DownloadState::Failed {
            failed += 1;
            eprintln!(
                "failed: {} {}",
                task.id,
                task.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
    if failed > 0 {
        return Ok(EXIT_USER);
    }
    Ok(EXIT_OK)
}

fn report(event: &EngineEvent) {
    match event {
        EngineEvent::TaskCompleted {
            task_id,
            final_path,
        } => {
            println!("Completed {task_id} -> {}", final_path.display());
        }
        EngineEvent::SessionRenewalRequired {
            task_id,
            source_url,
        } => {
            eprintln!(
                "Session expired for {task_id}; re-capture {} and run `dlm recapture {task_id}`",
                source_url.as_deref().unwrap_or("the origin page")
            );
        }
    }
}
