//! Shared-workspace split workflow: manifest import, disjoint-range writes
//! into one sparse `data.part`, and marker rendezvous.

mod common;

use std::time::Duration;

use dlm_core::config::DlmConfig;
use dlm_core::engine::Engine;
use dlm_core::task::DownloadState;
use dlm_core::workspace::manifest::{self, TaskManifest};
use tempfile::tempdir;

use common::range_server;
use common::{body, sha256, wait_for_state};

fn test_config() -> DlmConfig {
    DlmConfig {
        concurrency_limit: 1,
        download_dir: None,
    }
}

/// Write an assignment manifest for `parts` of an 8-part artifact.
fn assignment_manifest(
    dir: &std::path::Path,
    url: &str,
    total: u64,
    parts: &[u32],
) -> (std::path::PathBuf, TaskManifest) {
    let full = TaskManifest::split(
        uuid::Uuid::new_v4().to_string(),
        url.to_string(),
        "artifact.bin".to_string(),
        total,
        8,
    )
    .unwrap();
    let sub = full.assignment(parts).unwrap();
    let path = dir.join("assignment.manifest.json");
    manifest::save_manifest(&path, &sub).unwrap();
    (path, full)
}

#[tokio::test]
async fn import_downloads_only_declared_parts_into_shared_file() {
    let payload = body(800 * 1024);
    let server = range_server::start(payload.clone());
    let root = tempdir().unwrap();
    let engine = Engine::new(root.path(), test_config()).await.unwrap();

    let staging = tempdir().unwrap();
    let (manifest_path, full) =
        assignment_manifest(staging.path(), &server.url, payload.len() as u64, &[3, 5, 7]);

    let outcome = engine
        .import_partial(&manifest_path, None, false, None)
        .await
        .unwrap();
    assert_eq!(outcome.task_ids.len(), 1);
    let ws = outcome.workspace.clone();

    // Fresh workspace: every part outstanding, sparse data file full-sized.
    for part in 1..=8u32 {
        assert!(
            ws.join(format!("segments/{part:03}.missing")).exists(),
            "part {part} should start missing"
        );
    }
    assert_eq!(
        std::fs::metadata(ws.join("data.part")).unwrap().len(),
        payload.len() as u64
    );

    let id = &outcome.task_ids[0];
    let imported = engine.get(id).await.unwrap().unwrap();
    assert!(imported.partial);
    assert_eq!(imported.segments.len(), 3);
    assert_eq!(imported.assigned_parts, vec![3, 5, 7]);

    engine.start(id).await.unwrap();
    let done = wait_for_state(&engine, id, DownloadState::Completed, Duration::from_secs(30)).await;
    assert!((done.progress() - 100.0).abs() < 0.01);

    // Markers flipped for the declared parts only.
    for part in [3u32, 5, 7] {
        assert!(ws.join(format!("segments/{part:03}.done")).exists());
        assert!(!ws.join(format!("segments/{part:03}.missing")).exists());
    }
    for part in [1u32, 2, 4, 6, 8] {
        assert!(ws.join(format!("segments/{part:03}.missing")).exists());
        assert!(!ws.join(format!("segments/{part:03}.done")).exists());
    }

    // data.part holds the declared ranges byte-exact and zeros elsewhere.
    let content = std::fs::read(ws.join("data.part")).unwrap();
    assert_eq!(content.len(), payload.len());
    for range in &full.part_ranges {
        let slice = &content[range.start as usize..=range.end as usize];
        let expected = &payload[range.start as usize..=range.end as usize];
        if [3, 5, 7].contains(&range.part) {
            assert_eq!(
                sha256(slice),
                sha256(expected),
                "part {} bytes",
                range.part
            );
        } else {
            assert!(
                slice.iter().all(|b| *b == 0),
                "undeclared part {} must stay sparse",
                range.part
            );
        }
    }

    // Shared data.part is never renamed or relocated.
    assert!(ws.join("data.part").exists());
    assert!(!root.path().join("downloads/artifact.bin").exists());
}

#[tokio::test]
async fn second_import_skips_completed_parts() {
    let payload = body(800 * 1024);
    let server = range_server::start(payload.clone());
    let root = tempdir().unwrap();
    let engine = Engine::new(root.path(), test_config()).await.unwrap();

    let staging = tempdir().unwrap();
    let (manifest_path, _full) =
        assignment_manifest(staging.path(), &server.url, payload.len() as u64, &[3, 5]);

    // First peer takes part 3 and finishes it.
    let first = engine
        .import_partial(&manifest_path, Some(&[3]), false, None)
        .await
        .unwrap();
    engine.start(&first.task_ids[0]).await.unwrap();
    wait_for_state(
        &engine,
        &first.task_ids[0],
        DownloadState::Completed,
        Duration::from_secs(30),
    )
    .await;

    // Re-importing the full assignment only picks up part 5.
    let second = engine
        .import_partial(&manifest_path, None, false, None)
        .await
        .unwrap();
    let task = engine.get(&second.task_ids[0]).await.unwrap().unwrap();
    assert_eq!(task.assigned_parts, vec![5]);

    // Asking for the finished part alone is a user error.
    let err = engine
        .import_partial(&manifest_path, Some(&[3]), false, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already completed"));
}

#[tokio::test]
async fn separate_import_creates_one_task_per_part() {
    let payload = body(800 * 1024);
    let server = range_server::start(payload.clone());
    let root = tempdir().unwrap();
    let engine = Engine::new(root.path(), test_config()).await.unwrap();

    let staging = tempdir().unwrap();
    let (manifest_path, full) =
        assignment_manifest(staging.path(), &server.url, payload.len() as u64, &[1, 2]);

    let outcome = engine
        .import_partial(&manifest_path, None, true, None)
        .await
        .unwrap();
    assert_eq!(outcome.task_ids.len(), 2);

    for (id, part) in outcome.task_ids.iter().zip([1u32, 2]) {
        let task = engine.get(id).await.unwrap().unwrap();
        assert_eq!(task.assigned_parts, vec![part]);
        assert_eq!(task.segments.len(), 1);
        assert_eq!(
            task.target_filename.as_deref(),
            Some(format!("part_{part:03}.bin").as_str())
        );
        let range = &full.part_ranges[(part - 1) as usize];
        assert_eq!(task.segments[0].start, range.start);
        assert_eq!(task.segments[0].end, range.end);
    }
}

#[tokio::test]
async fn split_publishes_manifests_and_markers() {
    let payload_len = 400 * 1024u64;
    let root = tempdir().unwrap();
    let engine = Engine::new(root.path(), test_config()).await.unwrap();

    let mut req = dlm_core::engine::AddRequest::url("https://origin.example/artifact.bin");
    req.total_size = payload_len;
    let id = engine.add(req).await.unwrap();

    let ws = engine
        .split(&id, 4, &[vec![1, 2], vec![3, 4]])
        .await
        .unwrap();

    let m = manifest::load_manifest(&ws.join("task.manifest.json")).unwrap();
    assert_eq!(m.parts, 4);
    assert_eq!(m.total_size, payload_len);
    let covered: u64 = m.part_ranges.iter().map(|r| r.size).sum();
    assert_eq!(covered, payload_len);

    for part in 1..=4u32 {
        assert!(ws.join(format!("segments/{part:03}.missing")).exists());
    }
    assert_eq!(std::fs::metadata(ws.join("data.part")).unwrap().len(), payload_len);

    for peer in 1..=2 {
        let sub = manifest::load_manifest(&ws.join(format!("user_{peer}.manifest.json"))).unwrap();
        assert_eq!(sub.task_id, m.task_id);
        let parts: Vec<u32> = sub
            .assigned_parts
            .as_deref()
            .unwrap()
            .iter()
            .map(|r| r.part)
            .collect();
        assert_eq!(parts, if peer == 1 { vec![1, 2] } else { vec![3, 4] });
    }

    // Exported copy for distribution.
    assert!(root
        .path()
        .join("downloads/artifact.bin.manifest.json")
        .exists());
}
