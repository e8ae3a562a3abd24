//! Request assembly shared by probes and workers.

use crate::session::SessionDescriptor;
use curl::easy::{Easy, List};

use super::{CONNECT_TIMEOUT, READ_STALL_TIMEOUT};

/// Build the outgoing header list for a request: captured headers in order
/// (minus `Host`/`Content-Length`), `Referer` when absent, the joined
/// `Cookie` header, and an optional `Range`.
pub fn header_list(session: &SessionDescriptor, range: Option<&str>) -> Result<List, curl::Error> {
    let mut list = List::new();
    for (name, value) in session.request_headers() {
        list.append(&format!("{}: {}", name.trim(), value.trim()))?;
    }
    if let Some(cookie) = session.cookie_header() {
        list.append(&format!("Cookie: {cookie}"))?;
    }
    if let Some(range) = range {
        list.append(&format!("Range: bytes={range}"))?;
    }
    Ok(list)
}

/// Apply the common transfer options: URL, redirects, timeouts, session
/// headers (ordered), user agent, and an optional byte range.
pub fn configure(
    easy: &mut Easy,
    url: &str,
    session: &SessionDescriptor,
    range: Option<&str>,
) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(CONNECT_TIMEOUT)?;
    easy.low_speed_limit(1)?;
    easy.low_speed_time(READ_STALL_TIMEOUT)?;
    if let Some(agent) = &session.user_agent {
        easy.useragent(agent)?;
    }
    let list = header_list(session, range)?;
    easy.http_headers(list)?;
    Ok(())
}
