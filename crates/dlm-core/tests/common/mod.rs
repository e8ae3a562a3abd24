#![allow(dead_code)]

pub mod range_server;

use std::time::Duration;

use dlm_core::engine::Engine;
use dlm_core::task::{DownloadState, DownloadTask};

/// Deterministic pseudo-random body of `len` bytes.
pub fn body(len: usize) -> Vec<u8> {
    let mut state = 0x2545f491u32;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 24) as u8
        })
        .collect()
}

/// Poll until `predicate` holds or `timeout` elapses.
pub async fn wait_for<F>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    predicate()
}

/// Poll the engine until the task reaches `state`.
pub async fn wait_for_state(
    engine: &Engine,
    id: &str,
    state: DownloadState,
    timeout: Duration,
) -> DownloadTask {
    let start = std::time::Instant::now();
    loop {
        let task = engine.get(id).await.unwrap();
        if let Some(task) = &task {
            if task.state == state {
                return task.clone();
            }
        }
        if start.elapsed() > timeout {
            panic!(
                "task {id} never reached {:?}; last state: {:?}",
                state,
                task.map(|t| t.state)
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
