//! Target filename derivation and collision handling.
//!
//! A task needs a filename before its workspace exists: prefer the
//! Content-Disposition header captured at probe time, fall back to the last
//! URL path segment, sanitize for the filesystem.

mod disposition;
mod sanitize;

pub use disposition::content_disposition_filename;
pub use sanitize::sanitize_filename;

use std::path::{Path, PathBuf};

/// Default filename when neither the URL path nor Content-Disposition yields
/// anything usable.
const DEFAULT_FILENAME: &str = "download.bin";

/// Last path segment of `url`, or None for root/unparseable URLs.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path().split('/').filter(|s| !s.is_empty()).last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}

/// Derive a safe target filename for a task.
pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> String {
    let candidate = content_disposition
        .and_then(content_disposition_filename)
        .filter(|s| !s.is_empty())
        .or_else(|| filename_from_url(url));

    let raw = match candidate {
        Some(c) => c,
        None => return DEFAULT_FILENAME.to_string(),
    };

    let sanitized = sanitize_filename(&raw);
    if sanitized.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        sanitized
    }
}

/// Resolve a destination path that does not collide with an existing file by
/// appending `_1`, `_2`, … before the extension.
pub fn dedupe_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match filename.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s.to_string(), format!(".{e}")),
        _ => (filename.to_string(), String::new()),
    };

    let mut counter = 1u32;
    loop {
        let next = dir.join(format!("{stem}_{counter}{ext}"));
        if !next.exists() {
            return next;
        }
        counter += 1;
    }
}
