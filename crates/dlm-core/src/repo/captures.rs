//! Captured-browser download records.
//!
//! The capture subsystem (out of scope here) records direct-download
//! requests it intercepted: URL, filename, and the full session needed to
//! replay them. Promoting a capture turns it into a task; a later recapture
//! of the same URL refreshes a paused task's session.

use anyhow::Result;
use chrono::Utc;
use sqlx::Row;

use super::db::TaskStore;
use crate::session::{CapturedCookie, CapturedHeader, SessionDescriptor};

#[derive(Debug, Clone)]
pub struct BrowserCapture {
    pub id: i64,
    pub url: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub referrer: Option<String>,
    pub source_url: Option<String>,
    pub user_agent: Option<String>,
    pub headers: Vec<CapturedHeader>,
    pub cookies: Vec<CapturedCookie>,
    pub status: String,
}

impl BrowserCapture {
    pub fn session(&self) -> SessionDescriptor {
        SessionDescriptor {
            referer: self.referrer.clone(),
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

fn capture_from_row(row: &sqlx::sqlite::SqliteRow) -> BrowserCapture {
    let headers = row
        .get::<Option<String>, _>("captured_headers_json")
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    let cookies = row
        .get::<Option<String>, _>("captured_cookies_json")
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    BrowserCapture {
        id: row.get("id"),
        url: row.get("url"),
        filename: row.get("filename"),
        size: row.get::<Option<i64>, _>("size").map(|s| s as u64),
        referrer: row.get("referrer"),
        source_url: row.get("source_url"),
        user_agent: row.get("user_agent"),
        headers,
        cookies,
        status: row
            .get::<Option<String>, _>("status")
            .unwrap_or_else(|| "pending".into()),
    }
}

impl TaskStore {
    pub async fn add_capture(
        &self,
        url: &str,
        filename: Option<&str>,
        size: Option<u64>,
        source_url: Option<&str>,
        session: &SessionDescriptor,
    ) -> Result<i64> {
        let headers_json = serde_json::to_string(&session.headers)?;
        let cookies_json = serde_json::to_string(&session.cookies)?;
        let id = sqlx::query(
            r#"
            INSERT INTO captures (
                url, filename, size, referrer, source_url, user_agent,
                captured_headers_json, captured_cookies_json, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)
            "#,
        )
        .bind(url)
        .bind(filename)
        .bind(size.map(|s| s as i64))
        .bind(&session.referer)
        .bind(source_url)
        .bind(&session.user_agent)
        .bind(headers_json)
        .bind(cookies_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_capture(&self, id: i64) -> Result<Option<BrowserCapture>> {
        let row = sqlx::query("SELECT * FROM captures WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(capture_from_row))
    }

    /// Newest capture for a URL: what a re-opened browser session produced.
    pub async fn latest_capture_for_url(&self, url: &str) -> Result<Option<BrowserCapture>> {
        let row = sqlx::query(
            "SELECT * FROM captures WHERE url = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(capture_from_row))
    }

    pub async fn update_capture_size(&self, id: i64, size: u64) -> Result<()> {
        sqlx::query("UPDATE captures SET size = ?1 WHERE id = ?2")
            .bind(size as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_capture_status(&self, id: i64, status: &str) -> Result<()> {
        sqlx::query("UPDATE captures SET status = ?1 WHERE id = ?2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_capture(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM captures WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
