//! Streaming fallback worker for non-resumable or size-unknown tasks.
//!
//! Writes sequentially from offset zero, overwriting any prior partial data
//! (such a task cannot resume across restarts). A known total size is
//! enforced byte-exact; an unknown one falls back to the HTML-landing-page
//! heuristic before the task may complete.

use std::sync::{Arc, Mutex};

use curl::easy::Easy;

use crate::net::{self, headers, ResponseHeaders, TransferError};
use crate::task::Segment;
use crate::workspace::PartFile;

use super::active::{ActiveTask, WorkerGuard};
use super::Inner;

const CHUNK_SIZE: usize = 64 * 1024;
/// Streams shorter than this with unknown size get their head sniffed for
/// HTML markers.
const SUSPICIOUS_STREAM_BYTES: u64 = 200 * 1024;

/// An open-ended segment end while the stream length is unknown. Large
/// enough to never complete, small enough that `expected()` cannot overflow.
const OPEN_END: u64 = u64::MAX / 2;

enum StreamOutcome {
    Done,
    Cancelled,
    SessionExpired(u32),
    Failed(TransferError),
}

pub(crate) fn stream_worker(inner: Arc<Inner>, handle: Arc<ActiveTask>, part: PartFile) {
    let _guard = WorkerGuard::register(&handle);

    // One open segment tracks progress; its end byte is pinned down when the
    // stream finishes.
    {
        let mut t = handle.lock();
        let end = if t.total_size > 0 {
            t.total_size - 1
        } else {
            OPEN_END
        };
        if t.segments.is_empty() {
            t.segments.push(Segment::new(0, end));
        }
        let seg = &mut t.segments[0];
        seg.downloaded = 0;
        seg.checkpoint = 0;
    }

    match run_stream(&handle, &part) {
        StreamOutcome::Done => {
            let snapshot = {
                let mut t = handle.lock();
                let received = t.segments[0].downloaded;
                if t.total_size == 0 {
                    // The stream defines the artifact size.
                    t.segments[0].end = received - 1;
                }
                t.segments[0].advance_checkpoint();
                t.total_size = t.segments[0].expected();
                t.clone()
            };
            inner.persist_async(snapshot);
            // Monitor picks up the completed segment and dispatches finalize.
        }
        StreamOutcome::Cancelled => {}
        StreamOutcome::SessionExpired(status) => {
            // One second chance per task: the size may be learnable through a
            // ranged probe even when the plain stream is gated.
            maybe_reprobe_size(&inner, &handle);
            inner.trigger_renewal(&handle, status);
        }
        StreamOutcome::Failed(err) => {
            let snapshot = {
                let mut t = handle.lock();
                if !t.state.is_terminal() {
                    t.fail(format!("Stream error: {err}"));
                }
                t.clone()
            };
            inner.persist_async(snapshot);
        }
    }
}

fn run_stream(handle: &Arc<ActiveTask>, part: &PartFile) -> StreamOutcome {
    let (url, session, expected_total) = {
        let t = handle.lock();
        (t.url.clone(), t.session.clone(), t.total_size)
    };

    let mut easy = Easy::new();
    if let Err(e) = headers::configure(&mut easy, &url, &session, None) {
        return StreamOutcome::Failed(TransferError::Curl(e));
    }
    if let Err(e) = easy.buffer_size(CHUNK_SIZE) {
        return StreamOutcome::Failed(TransferError::Curl(e));
    }

    let response: Arc<Mutex<ResponseHeaders>> = Arc::new(Mutex::new(ResponseHeaders::default()));
    let aborted_by_cancel = Arc::new(Mutex::new(false));
    let storage_error: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));

    let perform_result = {
        let response_hdr = Arc::clone(&response);
        let response_body = Arc::clone(&response);
        let cancel_flag = Arc::clone(&aborted_by_cancel);
        let storage_slot = Arc::clone(&storage_error);
        let handle_body = Arc::clone(handle);
        let file = part.clone();

        let mut transfer = easy.transfer();
        if let Err(e) = transfer.header_function(move |line| {
            if let Ok(s) = std::str::from_utf8(line) {
                response_hdr.lock().unwrap().push_line(s);
            }
            true
        }) {
            return StreamOutcome::Failed(TransferError::Curl(e));
        }
        if let Err(e) = transfer.write_function(move |data| {
            {
                let resp = response_body.lock().unwrap();
                if resp.status != 0 && resp.status != 200 {
                    return Ok(0);
                }
                if resp.is_html() {
                    return Ok(0);
                }
            }
            if handle_body.is_cancelled() {
                *cancel_flag.lock().unwrap() = true;
                return Ok(0);
            }

            let mut t = handle_body.lock();
            let seg = &mut t.segments[0];
            let offset = seg.downloaded;
            if let Err(e) = file.write_at(offset, data) {
                storage_slot.lock().unwrap().replace(e);
                return Ok(0);
            }
            seg.downloaded += data.len() as u64;
            Ok(data.len())
        }) {
            return StreamOutcome::Failed(TransferError::Curl(e));
        }
        transfer.perform()
    };

    if *aborted_by_cancel.lock().unwrap() {
        return StreamOutcome::Cancelled;
    }
    if let Some(e) = storage_error.lock().unwrap().take() {
        return StreamOutcome::Failed(TransferError::Storage(e));
    }

    let resp = response.lock().unwrap().clone();
    if resp.is_html() {
        return StreamOutcome::Failed(TransferError::HtmlBody);
    }
    if resp.status != 0 && resp.status != 200 {
        return if net::is_session_expired_status(resp.status) {
            StreamOutcome::SessionExpired(resp.status)
        } else {
            StreamOutcome::Failed(TransferError::Http(resp.status))
        };
    }
    if let Err(e) = perform_result {
        return StreamOutcome::Failed(TransferError::Curl(e));
    }

    let received = handle.lock().segments[0].downloaded;

    // Strict byte enforcement when the size was declared up front.
    if expected_total > 0 && received != expected_total {
        return StreamOutcome::Failed(TransferError::ShortBody {
            expected: expected_total,
            received,
        });
    }

    if received == 0 {
        return StreamOutcome::Failed(TransferError::ShortBody {
            expected: expected_total,
            received: 0,
        });
    }

    // A tiny stream of unknown size is suspect: origins behind an expired
    // session often answer 200 with a login page.
    if expected_total == 0 && received < SUSPICIOUS_STREAM_BYTES && head_looks_like_html(part) {
        return StreamOutcome::Failed(TransferError::HtmlBody);
    }

    StreamOutcome::Done
}

fn head_looks_like_html(part: &PartFile) -> bool {
    let len = part.len().unwrap_or(0).min(1024) as usize;
    if len == 0 {
        return false;
    }
    let mut buf = vec![0u8; len];
    if part.read_exact_at(0, &mut buf).is_err() {
        return false;
    }
    let head = buf.to_ascii_lowercase();
    [b"<!doctype html".as_slice(), b"<html", b"<head"]
        .iter()
        .any(|marker| head.windows(marker.len()).any(|w| w == *marker))
}

/// Exactly once per task, try to learn the size through a ranged probe after
/// the plain stream hit the auth-expired class.
fn maybe_reprobe_size(inner: &Arc<Inner>, handle: &Arc<ActiveTask>) {
    let (url, session, already_probed) = {
        let t = handle.lock();
        (t.url.clone(), t.session.clone(), t.probed_via_stream)
    };
    if already_probed {
        return;
    }
    {
        handle.lock().probed_via_stream = true;
    }
    if let Ok(probe) = net::probe::content_length(&url, &session, net::DISCOVERY_TIMEOUT) {
        if let Some(size) = probe.size {
            let snapshot = {
                let mut t = handle.lock();
                if t.total_size == 0 {
                    t.total_size = size;
                }
                t.clone()
            };
            inner.persist_async(snapshot);
            return;
        }
    }
    let snapshot = handle.snapshot();
    inner.persist_async(snapshot);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_end_cannot_complete_or_overflow() {
        let seg = Segment::new(0, OPEN_END);
        assert!(seg.expected() > 0);
        let mut seg = seg;
        seg.downloaded = 10 * 1024 * 1024;
        assert!(!seg.is_complete());
    }

    #[test]
    fn html_head_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.part");
        let pf = PartFile::create(&path, 0).unwrap();
        pf.write_at(0, b"<!DOCTYPE html><html><body>login</body></html>")
            .unwrap();
        assert!(head_looks_like_html(&pf));

        let path2 = dir.path().join("data2.part");
        let pf2 = PartFile::create(&path2, 0).unwrap();
        pf2.write_at(0, &[0u8, 159, 146, 150, 7, 9]).unwrap();
        assert!(!head_looks_like_html(&pf2));
    }
}
