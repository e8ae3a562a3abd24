//! Per-segment download worker: one ranged GET streamed straight into
//! positioned writes, with cancellation polling, live end-byte tracking, and
//! 4 MiB durable checkpoints.

use std::sync::{Arc, Mutex};

use curl::easy::Easy;

use crate::net::{self, headers, ResponseHeaders, TransferError};
use crate::retry::{classify, RetryDecision, RetryPolicy};
use crate::safety;
use crate::session::SessionDescriptor;
use crate::workspace::PartFile;

use super::active::{ActiveTask, WorkerGuard};
use super::rebalance;
use super::Inner;

/// Chunk granularity; also the cancellation latency bound.
const CHUNK_SIZE: usize = 64 * 1024;
/// Checkpoint advance interval: sync to disk, then trust the bytes.
const CHECKPOINT_INTERVAL: u64 = 4 * 1024 * 1024;

enum Attempt {
    /// Segment finished; hashes stored.
    Done,
    /// Cancellation observed; leave quietly.
    Cancelled,
    /// Auth-expired class; escalate instead of retrying.
    SessionExpired(u32),
    Failed(TransferError),
}

/// Why the write callback stopped consuming the body early.
enum Abort {
    Cancelled,
    /// Requested range exhausted (possibly shrunk mid-flight by rebalance).
    RangeDone,
    BadStatus(u32),
    Html,
    Storage(std::io::Error),
}

fn note_abort(slot: &Mutex<Option<Abort>>, cause: Abort) {
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(cause);
    }
}

pub(crate) fn segment_worker(
    inner: Arc<Inner>,
    handle: Arc<ActiveTask>,
    index: usize,
    part: PartFile,
) {
    let _guard = WorkerGuard::register(&handle);
    let policy = RetryPolicy::default();
    let mut attempt = 1u32;

    loop {
        if handle.is_cancelled() {
            return;
        }
        match run_attempt(&inner, &handle, index, &part) {
            Attempt::Done => break,
            Attempt::Cancelled => return,
            Attempt::SessionExpired(status) => {
                inner.trigger_renewal(&handle, status);
                return;
            }
            Attempt::Failed(err) => {
                let kind = classify(&err);
                match policy.decide(attempt, kind) {
                    RetryDecision::RetryAfter(delay) => {
                        tracing::debug!(
                            segment = index,
                            attempt,
                            "segment attempt failed ({err}), retrying in {delay:?}"
                        );
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    RetryDecision::NoRetry => {
                        // Leave the segment incomplete; a later pass (resume,
                        // rebalance respawn) picks up from the checkpoint.
                        tracing::warn!(segment = index, "segment gave up: {err}");
                        break;
                    }
                }
            }
        }
    }

    if !handle.is_cancelled() {
        rebalance::try_rebalance(&inner, &handle);
    }
}

fn run_attempt(
    inner: &Arc<Inner>,
    handle: &Arc<ActiveTask>,
    index: usize,
    part: &PartFile,
) -> Attempt {
    let (url, session, range) = {
        let t = handle.lock();
        let Some(seg) = t.segments.get(index) else {
            return Attempt::Done;
        };
        if seg.is_complete() {
            return Attempt::Done;
        }
        (t.url.clone(), t.session.clone(), seg.range_value())
    };

    let mut easy = Easy::new();
    if let Err(e) = configure_transfer(&mut easy, &url, &session, &range) {
        return Attempt::Failed(TransferError::Curl(e));
    }

    let response: Arc<Mutex<ResponseHeaders>> = Arc::new(Mutex::new(ResponseHeaders::default()));
    let abort: Arc<Mutex<Option<Abort>>> = Arc::new(Mutex::new(None));

    let perform_result = {
        let response_hdr = Arc::clone(&response);
        let response_body = Arc::clone(&response);
        let abort_body = Arc::clone(&abort);
        let handle_body = Arc::clone(handle);
        let file = part.clone();
        let mut since_checkpoint = 0u64;

        let mut transfer = easy.transfer();
        if let Err(e) = transfer.header_function(move |line| {
            if let Ok(s) = std::str::from_utf8(line) {
                response_hdr.lock().unwrap().push_line(s);
            }
            true
        }) {
            return Attempt::Failed(TransferError::Curl(e));
        }
        if let Err(e) = transfer.write_function(move |data| {
            {
                let resp = response_body.lock().unwrap();
                if resp.status != 0 && !matches!(resp.status, 200 | 206) {
                    note_abort(&abort_body, Abort::BadStatus(resp.status));
                    return Ok(0);
                }
                if resp.is_html() {
                    note_abort(&abort_body, Abort::Html);
                    return Ok(0);
                }
            }
            if handle_body.is_cancelled() {
                note_abort(&abort_body, Abort::Cancelled);
                return Ok(0);
            }

            let mut t = handle_body.lock();
            let seg = &mut t.segments[index];
            // Fresh authoritative end: rebalance may have shrunk it since
            // the range was requested.
            let expected = seg.expected();
            if seg.downloaded >= expected {
                if seg.downloaded > expected {
                    seg.downloaded = expected;
                    seg.checkpoint = seg.checkpoint.min(expected);
                }
                note_abort(&abort_body, Abort::RangeDone);
                return Ok(0);
            }
            let remaining = (expected - seg.downloaded) as usize;
            let write_len = data.len().min(remaining);
            let offset = seg.start + seg.downloaded;
            if let Err(e) = file.write_at(offset, &data[..write_len]) {
                note_abort(&abort_body, Abort::Storage(e));
                return Ok(0);
            }
            seg.downloaded += write_len as u64;
            since_checkpoint += write_len as u64;
            if since_checkpoint >= CHECKPOINT_INTERVAL {
                // The checkpoint only advances over bytes known flushed.
                if file.sync_data().is_ok() {
                    seg.advance_checkpoint();
                }
                since_checkpoint = 0;
            }
            drop(t);

            if write_len < data.len() {
                // Overflowing chunk truncated to the remaining bytes.
                note_abort(&abort_body, Abort::RangeDone);
                return Ok(write_len);
            }
            Ok(data.len())
        }) {
            return Attempt::Failed(TransferError::Curl(e));
        }
        transfer.perform()
    };

    match abort.lock().unwrap().take() {
        Some(Abort::Cancelled) => return Attempt::Cancelled,
        Some(Abort::Storage(e)) => return Attempt::Failed(TransferError::Storage(e)),
        Some(Abort::Html) => return Attempt::Failed(TransferError::HtmlBody),
        Some(Abort::BadStatus(code)) => {
            return if net::is_session_expired_status(code) {
                Attempt::SessionExpired(code)
            } else {
                Attempt::Failed(TransferError::Http(code))
            };
        }
        Some(Abort::RangeDone) | None => {}
    }

    if let Err(e) = perform_result {
        // A deliberate early stop surfaces as a write error; real transport
        // failures are classified for retry.
        if !e.is_write_error() {
            return Attempt::Failed(TransferError::Curl(e));
        }
    }

    let status = response.lock().unwrap().status;
    if status != 0 && !matches!(status, 200 | 206) {
        return if net::is_session_expired_status(status) {
            Attempt::SessionExpired(status)
        } else {
            Attempt::Failed(TransferError::Http(status))
        };
    }

    finish_attempt(inner, handle, index, part)
}

/// Post-transfer accounting: either the segment is byte-exact complete (hash
/// and checkpoint it) or the stream closed early (retryable).
fn finish_attempt(
    inner: &Arc<Inner>,
    handle: &Arc<ActiveTask>,
    index: usize,
    part: &PartFile,
) -> Attempt {
    let (complete, expected, downloaded, seg_for_hash) = {
        let t = handle.lock();
        let seg = &t.segments[index];
        (seg.is_complete(), seg.expected(), seg.downloaded, seg.clone())
    };

    if !complete {
        return Attempt::Failed(TransferError::ShortBody {
            expected,
            received: downloaded,
        });
    }

    if part.sync_data().is_err() {
        tracing::warn!(segment = index, "final sync failed");
    }
    let hashes = safety::segment_hashes(part.path(), &seg_for_hash);
    let snapshot = {
        let mut t = handle.lock();
        let seg = &mut t.segments[index];
        seg.advance_checkpoint();
        if let Ok((start_hash, end_hash)) = hashes {
            seg.start_hash = Some(start_hash);
            seg.end_hash = Some(end_hash);
        }
        t.clone()
    };
    inner.save_meta(&snapshot);
    inner.persist_async(snapshot);
    Attempt::Done
}

fn configure_transfer(
    easy: &mut Easy,
    url: &str,
    session: &SessionDescriptor,
    range: &str,
) -> Result<(), curl::Error> {
    headers::configure(easy, url, session, Some(range))?;
    easy.buffer_size(CHUNK_SIZE)?;
    Ok(())
}
