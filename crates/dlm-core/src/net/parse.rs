//! Parse collected HTTP response header lines.

/// Key response headers for probing and body validation. When a transfer
/// followed redirects, only the final response's headers are kept (each new
/// status line resets the accumulator).
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    pub status: u32,
    pub content_length: Option<u64>,
    /// Total size parsed from `Content-Range: bytes a-b/N`.
    pub content_range_total: Option<u64>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub accept_ranges: bool,
}

impl ResponseHeaders {
    /// Feed one raw header line (as delivered by the header callback).
    pub fn push_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if let Some(rest) = line.strip_prefix("HTTP/") {
            // New response block (redirect hop): start over.
            *self = ResponseHeaders::default();
            self.status = rest
                .split_whitespace()
                .nth(1)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            return;
        }

        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            self.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("content-range") {
            self.content_range_total = value
                .rsplit_once('/')
                .and_then(|(_, total)| total.trim().parse().ok());
        } else if name.eq_ignore_ascii_case("content-type") {
            self.content_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-disposition") {
            self.content_disposition = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            self.accept_ranges = value.eq_ignore_ascii_case("bytes");
        }
    }

    /// True when the origin answered with an HTML document.
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|t| t.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }

    /// Best-effort total size: `Content-Range` total wins over `Content-Length`
    /// (a ranged probe's Content-Length is the probe window, not the artifact).
    pub fn total_size(&self) -> Option<u64> {
        self.content_range_total.or(self.content_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(lines: &[&str]) -> ResponseHeaders {
        let mut h = ResponseHeaders::default();
        for l in lines {
            h.push_line(l);
        }
        h
    }

    #[test]
    fn parses_status_length_and_ranges() {
        let h = collect(&[
            "HTTP/1.1 200 OK",
            "Content-Length: 12345",
            "Accept-Ranges: bytes",
        ]);
        assert_eq!(h.status, 200);
        assert_eq!(h.content_length, Some(12345));
        assert!(h.accept_ranges);
        assert_eq!(h.total_size(), Some(12345));
    }

    #[test]
    fn content_range_total_wins() {
        let h = collect(&[
            "HTTP/1.1 206 Partial Content",
            "Content-Length: 1",
            "Content-Range: bytes 0-0/987654",
        ]);
        assert_eq!(h.status, 206);
        assert_eq!(h.total_size(), Some(987654));
    }

    #[test]
    fn redirect_hop_resets_accumulator() {
        let h = collect(&[
            "HTTP/1.1 302 Found",
            "Content-Length: 0",
            "Location: https://cdn.example/f.bin",
            "HTTP/1.1 200 OK",
            "Content-Length: 555",
        ]);
        assert_eq!(h.status, 200);
        assert_eq!(h.content_length, Some(555));
    }

    #[test]
    fn html_detection_is_case_insensitive() {
        let h = collect(&["HTTP/1.1 200 OK", "Content-Type: TEXT/HTML; charset=utf-8"]);
        assert!(h.is_html());
        let h2 = collect(&["HTTP/1.1 200 OK", "Content-Type: application/octet-stream"]);
        assert!(!h2.is_html());
    }

    #[test]
    fn wildcard_content_range_total_ignored() {
        let h = collect(&["HTTP/1.1 206 Partial Content", "Content-Range: bytes 0-0/*"]);
        assert_eq!(h.content_range_total, None);
    }
}
