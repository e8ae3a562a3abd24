//! Session descriptor for replaying browser-originated downloads.
//!
//! Captured headers keep their original order; anti-bot origins are sensitive
//! to it, so the list is never turned into a map. Only `Host` and
//! `Content-Length` are excluded when the request is assembled.

use serde::{Deserialize, Serialize};

/// One captured header, order-significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedHeader {
    pub name: String,
    pub value: String,
}

/// One captured cookie (name → value), order-significant in the Cookie header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedCookie {
    pub name: String,
    pub value: String,
}

/// The bundle of referer, ordered headers, cookies, and user agent used to
/// replay a browser-originated download. All fields optional; a plain URL
/// download carries an empty descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub referer: Option<String>,
    pub headers: Vec<CapturedHeader>,
    pub cookies: Vec<CapturedCookie>,
    pub user_agent: Option<String>,
}

impl SessionDescriptor {
    pub fn is_empty(&self) -> bool {
        self.referer.is_none()
            && self.headers.is_empty()
            && self.cookies.is_empty()
            && self.user_agent.is_none()
    }

    /// Headers to send, in capture order, excluding only `Host` and
    /// `Content-Length`. Appends `Referer` when one was captured separately
    /// and is not already present.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::with_capacity(self.headers.len() + 1);
        for h in &self.headers {
            let lower = h.name.to_ascii_lowercase();
            if lower == "host" || lower == "content-length" {
                continue;
            }
            out.push((h.name.clone(), h.value.clone()));
        }
        if let Some(referer) = &self.referer {
            if !out.iter().any(|(n, _)| n.eq_ignore_ascii_case("referer")) {
                out.push(("Referer".to_string(), referer.clone()));
            }
        }
        out
    }

    /// Cookie header value in capture order, or None when no cookies were captured.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let joined = self
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        Some(joined)
    }
}
