//! Size and range-capability probing.
//!
//! HEAD first; origins that block HEAD or omit the length get a
//! `Range: bytes=0-0` GET whose `Content-Range` denominator reveals the
//! artifact size. The caller records when the size came from the stream
//! probe (`via_stream`) so discovery never repeats the identical fallback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::session::SessionDescriptor;
use curl::easy::Easy;

use super::headers::configure;
use super::{ResponseHeaders, TransferError};

/// Outcome of a size probe.
#[derive(Debug, Clone)]
pub struct SizeProbe {
    pub size: Option<u64>,
    /// True when the size was learned via the ranged GET fallback.
    pub via_stream: bool,
    /// Filename hint, when the origin sent one.
    pub content_disposition: Option<String>,
}

/// Probe the artifact size.
///
/// Fails with [`TransferError::SessionExpired`] on 401/403/410 and with
/// [`TransferError::HtmlBody`] when the origin serves an HTML page instead
/// of the artifact (expired session on a direct-download URL).
pub fn content_length(
    url: &str,
    session: &SessionDescriptor,
    timeout: Duration,
) -> Result<SizeProbe, TransferError> {
    match head_probe(url, session, timeout) {
        Ok(headers) if headers.total_size().is_some() => {
            if headers.is_html() {
                return Err(TransferError::HtmlBody);
            }
            return Ok(SizeProbe {
                size: headers.total_size(),
                via_stream: false,
                content_disposition: headers.content_disposition,
            });
        }
        Ok(_) => {}
        Err(TransferError::SessionExpired(code)) => {
            return Err(TransferError::SessionExpired(code))
        }
        Err(_) => {
            // HEAD blocked or broken; the ranged GET below is authoritative.
        }
    }

    tracing::debug!(url, "HEAD gave no length, probing via ranged GET");
    let headers = range_probe(url, session, timeout)?;
    if headers.is_html() {
        return Err(TransferError::HtmlBody);
    }
    if !matches!(headers.status, 200 | 206) {
        return Err(TransferError::from_status(headers.status));
    }
    Ok(SizeProbe {
        size: headers.total_size(),
        via_stream: true,
        content_disposition: headers.content_disposition,
    })
}

/// True iff the origin honors byte ranges (`Range: bytes=0-0` answered 206).
pub fn supports_ranges(url: &str, session: &SessionDescriptor, timeout: Duration) -> bool {
    range_probe(url, session, timeout)
        .map(|h| h.status == 206)
        .unwrap_or(false)
}

fn head_probe(
    url: &str,
    session: &SessionDescriptor,
    timeout: Duration,
) -> Result<ResponseHeaders, TransferError> {
    let mut easy = Easy::new();
    configure(&mut easy, url, session, None)?;
    easy.nobody(true)?;
    easy.timeout(timeout)?;

    let headers = perform_collecting_headers(&mut easy)?;
    if !(200..300).contains(&headers.status) {
        return Err(TransferError::from_status(headers.status));
    }
    Ok(headers)
}

fn range_probe(
    url: &str,
    session: &SessionDescriptor,
    timeout: Duration,
) -> Result<ResponseHeaders, TransferError> {
    let mut easy = Easy::new();
    configure(&mut easy, url, session, Some("0-0"))?;
    easy.timeout(timeout)?;
    perform_collecting_headers(&mut easy)
}

/// Run the transfer, discarding any body bytes and collecting parsed headers.
fn perform_collecting_headers(easy: &mut Easy) -> Result<ResponseHeaders, TransferError> {
    let collected = Arc::new(Mutex::new(ResponseHeaders::default()));
    {
        let collected = Arc::clone(&collected);
        let mut transfer = easy.transfer();
        transfer.header_function(move |line| {
            if let Ok(s) = std::str::from_utf8(line) {
                collected.lock().unwrap().push_line(s);
            }
            true
        })?;
        transfer.write_function(|data| Ok(data.len()))?;
        transfer.perform()?;
    }
    let headers = collected.lock().unwrap().clone();
    Ok(headers)
}
