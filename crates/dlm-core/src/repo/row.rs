//! Map a `downloads` row back into the task aggregate.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;

use crate::session::{CapturedCookie, CapturedHeader, SessionDescriptor};
use crate::task::{DownloadState, DownloadTask, IntegrityState, ResumeState, Segment, Stage};

fn parse_time(value: Option<String>) -> DateTime<Utc> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

pub(super) fn task_from_row(row: &SqliteRow) -> Result<DownloadTask> {
    let id: String = row.get("id");

    let segments: Vec<Segment> = row
        .get::<Option<String>, _>("segments_json")
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str)
        .transpose()
        .with_context(|| format!("segments_json for task {id}"))?
        .unwrap_or_default();

    let headers: Vec<CapturedHeader> = row
        .get::<Option<String>, _>("captured_headers_json")
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str)
        .transpose()
        .unwrap_or_default()
        .unwrap_or_default();

    let cookies: Vec<CapturedCookie> = row
        .get::<Option<String>, _>("captured_cookies_json")
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str)
        .transpose()
        .unwrap_or_default()
        .unwrap_or_default();

    let assigned_parts: Vec<u32> = row
        .get::<Option<String>, _>("assigned_parts")
        .as_deref()
        .map(|s| {
            s.split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    let session = SessionDescriptor {
        referer: row.get("referer"),
        headers,
        cookies,
        user_agent: row.get("user_agent"),
    };

    Ok(DownloadTask {
        id,
        url: row.get("url"),
        session,
        target_filename: row.get("target_filename"),
        total_size: row.get::<i64, _>("total_size") as u64,
        state: DownloadState::parse(&row.get::<String, _>("state")),
        segments,
        created_at: parse_time(Some(row.get::<String, _>("created_at"))),
        last_update: parse_time(row.get("last_update")),
        error_message: row.get("error_message"),
        speed_bps: row.get::<Option<f64>, _>("speed_bps").unwrap_or(0.0),
        resumable: row.get::<Option<i64>, _>("resumable").unwrap_or(1) != 0,
        resume_state: ResumeState::parse(
            row.get::<Option<String>, _>("resume_state").as_deref().unwrap_or(""),
        ),
        integrity: IntegrityState::parse(
            row.get::<Option<String>, _>("integrity_state").as_deref().unwrap_or(""),
        ),
        max_connections: row.get::<Option<i64>, _>("max_connections").unwrap_or(1) as u32,
        partial: row.get::<Option<i64>, _>("partial").unwrap_or(0) != 0,
        task_id: row.get("task_id"),
        assigned_parts,
        folder_id: row.get("folder_id"),
        source: row.get("source"),
        media_type: row.get("media_type"),
        output_path: row
            .get::<Option<String>, _>("output_path")
            .map(PathBuf::from),
        source_url: row.get("source_url"),
        capture_id: row.get("capture_id"),
        probed_via_stream: row.get::<Option<i64>, _>("probed_via_stream").unwrap_or(0) != 0,
        current_stage: row
            .get::<Option<String>, _>("current_stage")
            .as_deref()
            .and_then(Stage::parse),
        ephemeral: false,
    })
}
