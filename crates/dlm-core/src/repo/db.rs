//! SQLite-backed task store.

use anyhow::{bail, Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;

use crate::task::{DownloadState, DownloadTask};

use super::row::task_from_row;

/// Handle to the repository database. Clone-cheap (pooled).
#[derive(Clone)]
pub struct TaskStore {
    pub(crate) pool: Pool<Sqlite>,
}

/// Columns added after the initial schema. Introduced with defaults on open;
/// never removed or rewritten (additive-only migration).
const LATER_COLUMNS: &[(&str, &str)] = &[
    ("assigned_parts", "TEXT"),
    ("probed_via_stream", "INTEGER DEFAULT 0"),
    ("folder_id", "INTEGER"),
    ("referer", "TEXT"),
    ("captured_headers_json", "TEXT"),
    ("captured_cookies_json", "TEXT"),
    ("user_agent", "TEXT"),
    ("source", "TEXT"),
    ("media_type", "TEXT"),
    ("source_url", "TEXT"),
    ("capture_id", "INTEGER"),
    ("output_path", "TEXT"),
    ("current_stage", "TEXT"),
];

impl TaskStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .context("parse sqlite uri")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await
            .with_context(|| format!("open task store: {}", path.display()))?;

        let store = TaskStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests (single connection so the schema persists).
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = TaskStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                target_filename TEXT,
                total_size INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_update TEXT,
                error_message TEXT,
                segments_json TEXT,
                speed_bps REAL,
                resumable INTEGER,
                resume_state TEXT,
                integrity_state TEXT,
                max_connections INTEGER,
                partial INTEGER,
                task_id TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS folders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                parent_id INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (parent_id) REFERENCES folders(id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS captures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                filename TEXT,
                size INTEGER,
                referrer TEXT,
                source_url TEXT,
                user_agent TEXT,
                captured_headers_json TEXT,
                captured_cookies_json TEXT,
                status TEXT DEFAULT 'pending',
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        let rows = sqlx::query("PRAGMA table_info(downloads)")
            .fetch_all(&self.pool)
            .await?;
        let existing: Vec<String> = rows.iter().map(|r| r.get::<String, _>("name")).collect();
        for (name, decl) in LATER_COLUMNS {
            if !existing.iter().any(|c| c == name) {
                let stmt = format!("ALTER TABLE downloads ADD COLUMN {name} {decl}");
                sqlx::query(&stmt).execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    /// Persist the full task projection. Atomic: either the new row is wholly
    /// visible after a crash or the prior one is. Refuses invariant-violating
    /// tasks and ephemeral tasks.
    pub async fn save(&self, task: &DownloadTask) -> Result<()> {
        if task.ephemeral {
            return Ok(());
        }
        if let Err(e) = task.validate() {
            bail!("refusing to persist task {}: {e}", task.id);
        }

        let segments_json = serde_json::to_string(&task.segments)?;
        let headers_json = serde_json::to_string(&task.session.headers)?;
        let cookies_json = serde_json::to_string(&task.session.cookies)?;
        let assigned = if task.assigned_parts.is_empty() {
            None
        } else {
            Some(
                task.assigned_parts
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            )
        };

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO downloads (
                id, url, target_filename, total_size, state, created_at,
                last_update, error_message, segments_json, speed_bps,
                resumable, resume_state, integrity_state, max_connections,
                partial, task_id, assigned_parts, probed_via_stream,
                folder_id, referer, captured_headers_json,
                captured_cookies_json, user_agent, source, media_type,
                source_url, capture_id, output_path, current_stage
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                ?27, ?28, ?29
            )
            "#,
        )
        .bind(&task.id)
        .bind(&task.url)
        .bind(&task.target_filename)
        .bind(task.total_size as i64)
        .bind(task.state.as_str())
        .bind(task.created_at.to_rfc3339())
        .bind(task.last_update.to_rfc3339())
        .bind(&task.error_message)
        .bind(segments_json)
        .bind(task.speed_bps)
        .bind(task.resumable as i64)
        .bind(task.resume_state.as_str())
        .bind(task.integrity.as_str())
        .bind(task.max_connections as i64)
        .bind(task.partial as i64)
        .bind(&task.task_id)
        .bind(assigned)
        .bind(task.probed_via_stream as i64)
        .bind(task.folder_id)
        .bind(&task.session.referer)
        .bind(headers_json)
        .bind(cookies_json)
        .bind(&task.session.user_agent)
        .bind(&task.source)
        .bind(&task.media_type)
        .bind(&task.source_url)
        .bind(task.capture_id)
        .bind(task.output_path.as_ref().map(|p| p.display().to_string()))
        .bind(task.current_stage.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<DownloadTask>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| task_from_row(&r)).transpose()
    }

    pub async fn get_all(&self) -> Result<Vec<DownloadTask>> {
        let rows = sqlx::query("SELECT * FROM downloads ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    pub async fn get_by_folder(&self, folder_id: Option<i64>) -> Result<Vec<DownloadTask>> {
        let rows = match folder_id {
            Some(fid) => {
                sqlx::query(
                    "SELECT * FROM downloads WHERE folder_id = ?1 ORDER BY created_at, id",
                )
                .bind(fid)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM downloads WHERE folder_id IS NULL ORDER BY created_at, id",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(task_from_row).collect()
    }

    /// Ids of WAITING tasks in FIFO (creation) order.
    pub async fn waiting_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM downloads WHERE state = 'WAITING' ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("id")).collect())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM downloads WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Normalize states left over from a crash: active rows become PAUSED,
    /// WAITING rows re-enter the queue as QUEUED. Returns rows touched.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let paused = sqlx::query(
            "UPDATE downloads SET state = 'PAUSED' \
             WHERE state IN ('DOWNLOADING', 'INITIALIZING')",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        let queued = sqlx::query("UPDATE downloads SET state = 'QUEUED' WHERE state = 'WAITING'")
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(paused + queued)
    }

    /// Find the task promoted from a given browser capture, if any.
    pub async fn get_by_capture_id(&self, capture_id: i64) -> Result<Option<DownloadTask>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE capture_id = ?1")
            .bind(capture_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| task_from_row(&r)).transpose()
    }

    /// Count of rows in a given state (used by tests and status views).
    pub async fn count_in_state(&self, state: DownloadState) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM downloads WHERE state = ?1")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CapturedHeader;
    use crate::task::{DownloadState, Segment};

    #[tokio::test]
    async fn save_get_roundtrip_preserves_projection() {
        let store = TaskStore::open_memory().await.unwrap();
        let mut task = DownloadTask::new("https://example.com/f.iso");
        task.target_filename = Some("f.iso".into());
        task.total_size = 1000;
        task.segments = vec![Segment::new(0, 499), Segment::new(500, 999)];
        task.segments[0].downloaded = 100;
        task.segments[0].checkpoint = 100;
        task.segments[1].part = Some(2);
        task.session.headers.push(CapturedHeader {
            name: "X-Auth".into(),
            value: "tok".into(),
        });
        task.session.referer = Some("https://page/".into());
        task.assigned_parts = vec![2, 4];
        task.probed_via_stream = true;

        store.save(&task).await.unwrap();
        let loaded = store.get(&task.id).await.unwrap().expect("row exists");
        assert_eq!(loaded.url, task.url);
        assert_eq!(loaded.total_size, 1000);
        assert_eq!(loaded.segments, task.segments);
        assert_eq!(loaded.session.headers, task.session.headers);
        assert_eq!(loaded.session.referer.as_deref(), Some("https://page/"));
        assert_eq!(loaded.assigned_parts, vec![2, 4]);
        assert!(loaded.probed_via_stream);
        assert_eq!(loaded.state, DownloadState::Queued);

        // L1: saving the loaded projection and reloading is a fixpoint.
        store.save(&loaded).await.unwrap();
        let again = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(again.segments, loaded.segments);
        assert_eq!(again.created_at, loaded.created_at);
    }

    #[tokio::test]
    async fn save_refuses_invariant_violations() {
        let store = TaskStore::open_memory().await.unwrap();
        let mut task = DownloadTask::new("u");
        task.segments = vec![Segment::new(0, 100), Segment::new(50, 150)];
        assert!(store.save(&task).await.is_err());
        assert!(store.get(&task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ephemeral_tasks_never_persist() {
        let store = TaskStore::open_memory().await.unwrap();
        let mut task = DownloadTask::new("u");
        task.ephemeral = true;
        store.save(&task).await.unwrap();
        assert!(store.get(&task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recover_interrupted_normalizes_states() {
        let store = TaskStore::open_memory().await.unwrap();
        let mut a = DownloadTask::new("a");
        a.state = DownloadState::Downloading;
        let mut b = DownloadTask::new("b");
        b.state = DownloadState::Waiting;
        let mut c = DownloadTask::new("c");
        c.state = DownloadState::Completed;
        for t in [&a, &b, &c] {
            store.save(t).await.unwrap();
        }

        let touched = store.recover_interrupted().await.unwrap();
        assert_eq!(touched, 2);
        assert_eq!(
            store.get(&a.id).await.unwrap().unwrap().state,
            DownloadState::Paused
        );
        assert_eq!(
            store.get(&b.id).await.unwrap().unwrap().state,
            DownloadState::Queued
        );
        assert_eq!(
            store.get(&c.id).await.unwrap().unwrap().state,
            DownloadState::Completed
        );
    }

    #[tokio::test]
    async fn waiting_ids_fifo_and_delete() {
        let store = TaskStore::open_memory().await.unwrap();
        let mut a = DownloadTask::new("a");
        a.state = DownloadState::Waiting;
        let mut b = DownloadTask::new("b");
        b.state = DownloadState::Waiting;
        b.created_at = a.created_at + chrono::Duration::seconds(1);
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        assert_eq!(store.waiting_ids().await.unwrap(), vec![a.id.clone(), b.id.clone()]);

        store.delete(&a.id).await.unwrap();
        assert_eq!(store.waiting_ids().await.unwrap(), vec![b.id.clone()]);
        assert!(store.get(&a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn migration_is_idempotent() {
        let store = TaskStore::open_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
        let task = DownloadTask::new("u");
        store.save(&task).await.unwrap();
        assert!(store.get(&task.id).await.unwrap().is_some());
    }
}
