//! Map transfer errors onto retry error kinds.

use crate::net::TransferError;

use super::policy::ErrorKind;

/// Classify an HTTP status for retry decisions.
fn classify_status(code: u32) -> ErrorKind {
    match code {
        401 | 403 | 410 => ErrorKind::SessionExpired(code as u16),
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl transport error.
fn classify_curl(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

/// Classify a transfer error into a retry kind.
pub fn classify(e: &TransferError) -> ErrorKind {
    match e {
        TransferError::Curl(ce) => classify_curl(ce),
        TransferError::Http(code) => classify_status(*code),
        TransferError::SessionExpired(code) => ErrorKind::SessionExpired(*code as u16),
        // Premature close with a valid prefix on disk: worth another pass.
        TransferError::ShortBody { .. } => ErrorKind::Connection,
        TransferError::HtmlBody | TransferError::Storage(_) => ErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_statuses() {
        assert_eq!(classify(&TransferError::Http(429)), ErrorKind::Throttled);
        assert_eq!(classify(&TransferError::Http(503)), ErrorKind::Throttled);
    }

    #[test]
    fn server_errors_retryable() {
        assert!(matches!(
            classify(&TransferError::Http(500)),
            ErrorKind::Http5xx(500)
        ));
        assert!(matches!(
            classify(&TransferError::Http(502)),
            ErrorKind::Http5xx(502)
        ));
    }

    #[test]
    fn auth_class_escalates() {
        assert_eq!(
            classify(&TransferError::SessionExpired(403)),
            ErrorKind::SessionExpired(403)
        );
        assert_eq!(
            classify(&TransferError::Http(401)),
            ErrorKind::SessionExpired(401)
        );
    }

    #[test]
    fn short_body_is_retryable() {
        assert_eq!(
            classify(&TransferError::ShortBody {
                expected: 100,
                received: 10
            }),
            ErrorKind::Connection
        );
    }

    #[test]
    fn html_and_storage_are_terminal() {
        assert_eq!(classify(&TransferError::HtmlBody), ErrorKind::Other);
        assert_eq!(
            classify(&TransferError::Storage(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full"
            ))),
            ErrorKind::Other
        );
    }

    #[test]
    fn plain_4xx_not_retried() {
        assert_eq!(classify(&TransferError::Http(404)), ErrorKind::Other);
    }
}
