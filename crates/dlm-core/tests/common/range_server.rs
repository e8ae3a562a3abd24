//! Minimal HTTP/1.1 server with HEAD and Range GET support for integration
//! tests, plus failure-injection knobs: blocked HEAD, ignored ranges, HTML
//! bodies, throttled streaming, and a flippable auth gate.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, responses omit Content-Length and Content-Range entirely
    /// (size stays unknown).
    pub send_length: bool,
    /// Content-Type for every response body.
    pub content_type: &'static str,
    /// Bytes written per write call.
    pub chunk_size: usize,
    /// Sleep between body chunks (throttling for mid-transfer tests).
    pub chunk_delay: Duration,
    /// While the session gate is closed, GETs whose range starts at or above
    /// this offset answer 403.
    pub forbid_start_at_or_above: Option<u64>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            send_length: true,
            content_type: "application/octet-stream",
            chunk_size: 32 * 1024,
            chunk_delay: Duration::ZERO,
            forbid_start_at_or_above: None,
        }
    }
}

/// Observable server state shared with the test.
pub struct ServerState {
    session_valid: AtomicBool,
    /// (method, range) per request, in arrival order.
    pub requests: Mutex<Vec<(String, Option<(u64, u64)>)>>,
}

impl ServerState {
    pub fn set_session_valid(&self, valid: bool) {
        self.session_valid.store(valid, Ordering::SeqCst);
    }

    /// Lowest range start among logged GETs, if any carried a Range header.
    pub fn min_get_range_start(&self) -> Option<u64> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == "GET")
            .filter_map(|(_, r)| r.map(|(s, _)| s))
            .min()
    }
}

pub struct TestServer {
    pub url: String,
    pub state: Arc<ServerState>,
}

pub fn start(body: Vec<u8>) -> TestServer {
    start_with_options(body, ServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: ServerOptions) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let state = Arc::new(ServerState {
        session_valid: AtomicBool::new(true),
        requests: Mutex::new(Vec::new()),
    });
    let state_srv = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let state = Arc::clone(&state_srv);
            thread::spawn(move || handle(stream, &body, opts, &state));
        }
    });
    TestServer {
        url: format!("http://127.0.0.1:{port}/artifact.bin"),
        state,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: ServerOptions,
    state: &ServerState,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range) = parse_request(request);
    state
        .requests
        .lock()
        .unwrap()
        .push((method.to_string(), range));
    let total = body.len() as u64;

    if method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        let mut response = String::from("HTTP/1.1 200 OK\r\n");
        if opts.send_length {
            response.push_str(&format!("Content-Length: {total}\r\n"));
        }
        if opts.support_ranges {
            response.push_str("Accept-Ranges: bytes\r\n");
        }
        response.push_str(&format!("Content-Type: {}\r\n\r\n", opts.content_type));
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");
        return;
    }

    if let Some(threshold) = opts.forbid_start_at_or_above {
        let start = range.map(|(s, _)| s).unwrap_or(0);
        if !state.session_valid.load(Ordering::SeqCst) && start >= threshold {
            let _ = stream
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n");
            return;
        }
    }

    let (status, slice, content_range) = match (opts.support_ranges, range) {
        (true, Some((start, end_incl))) => {
            let start = start.min(total);
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl {
                let _ = stream.write_all(
                    format!(
                        "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                return;
            }
            let slice = &body[start as usize..=end_incl as usize];
            (
                "206 Partial Content",
                slice,
                Some(format!("bytes {start}-{end_incl}/{total}")),
            )
        }
        _ => ("200 OK", body, None),
    };

    let mut response = format!("HTTP/1.1 {status}\r\n");
    if opts.send_length {
        response.push_str(&format!("Content-Length: {}\r\n", slice.len()));
        if let Some(cr) = content_range {
            response.push_str(&format!("Content-Range: {cr}\r\n"));
        }
    }
    if opts.support_ranges {
        response.push_str("Accept-Ranges: bytes\r\n");
    }
    response.push_str(&format!("Content-Type: {}\r\n", opts.content_type));
    if !opts.send_length {
        response.push_str("Connection: close\r\n");
    }
    response.push_str("\r\n");
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }

    for chunk in slice.chunks(opts.chunk_size.max(1)) {
        if stream.write_all(chunk).is_err() {
            return;
        }
        if !opts.chunk_delay.is_zero() {
            thread::sleep(opts.chunk_delay);
        }
    }
}

/// Returns (method, optional (start, end_inclusive) for `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = spec.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() {
                            u64::MAX
                        } else {
                            end.parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
