use serde_json::json;

/// Error type shared by every stage of a relayed chat request.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Stream decode error: {0}")]
    Decode(String),
    #[error("Invalid tool call: {0}")]
    InvalidToolCall(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    RateLimit,
    ServerError,
}

/// Message shown to clients once rate-limit retries are exhausted.
pub const RATE_LIMIT_NOTICE: &str =
    "The model provider is rate limiting requests right now. Please retry in a few moments.";

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            _ if self.is_rate_limited() => ErrorCategory::RateLimit,
            _ => ErrorCategory::ServerError,
        }
    }

    /// Whether this error is an upstream rate-limit signal: HTTP 429, or a
    /// message reporting resource exhaustion.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        match self {
            RelayError::Upstream { status, message } => {
                *status == 429 || message_signals_exhaustion(message)
            }
            RelayError::Transport(message) | RelayError::Decode(message) => {
                message_signals_exhaustion(message)
            }
            _ => false,
        }
    }
}

#[inline]
fn message_signals_exhaustion(message: &str) -> bool {
    const NEEDLES: [&[u8]; 4] = [
        b"resource_exhausted",
        b"resource exhausted",
        b"resource has been exhausted",
        b"rate limit",
    ];
    let haystack = message.as_bytes();
    NEEDLES
        .iter()
        .any(|needle| contains_ascii_case_insensitive(haystack, needle))
}

#[inline]
pub(crate) fn contains_ascii_case_insensitive(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }

    haystack.windows(needle.len()).any(|window| {
        window
            .iter()
            .zip(needle.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Format a pre-stream error, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(err: &RelayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    let message = match cat {
        ErrorCategory::RateLimit => RATE_LIMIT_NOTICE.to_string(),
        ErrorCategory::InvalidRequest | ErrorCategory::ServerError => err.to_string(),
    };
    (status, json!({ "error": message }))
}

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

/// Reduce an upstream error body to a short, loggable message.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    const MAX_LEN: usize = 500;

    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let error = json.get("error").or_else(|| {
            // Vertex wraps errors in a one-element array.
            json.as_array()
                .and_then(|items| items.first())
                .and_then(|first| first.get("error"))
        });
        if let Some(msg) = error
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return truncate_on_char_boundary(msg, MAX_LEN);
        }
    }

    truncate_on_char_boundary(&String::from_utf8_lossy(body), MAX_LEN)
}

fn truncate_on_char_boundary(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_by_status() {
        let err = RelayError::Upstream {
            status: 429,
            message: "slow down".into(),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.category(), ErrorCategory::RateLimit);
    }

    #[test]
    fn test_rate_limit_by_message() {
        let err = RelayError::Upstream {
            status: 400,
            message: "RESOURCE_EXHAUSTED: quota".into(),
        };
        assert!(err.is_rate_limited());
        let err = RelayError::Transport("Resource has been exhausted (e.g. check quota).".into());
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_other_errors_are_not_rate_limited() {
        let err = RelayError::Upstream {
            status: 500,
            message: "boom".into(),
        };
        assert!(!err.is_rate_limited());
        assert_eq!(err.category(), ErrorCategory::ServerError);
        assert!(!RelayError::InvalidToolCall("x".into()).is_rate_limited());
    }

    #[test]
    fn test_format_error_statuses() {
        let (status, body) = format_error(&RelayError::InvalidRequest("no messages".into()));
        assert_eq!(status, http::StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request: no messages");

        let (status, body) = format_error(&RelayError::Upstream {
            status: 429,
            message: "quota".into(),
        });
        assert_eq!(status, http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], RATE_LIMIT_NOTICE);

        let (status, _) = format_error(&RelayError::Transport("reset".into()));
        assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_sanitize_upstream_error_variants() {
        assert_eq!(
            sanitize_upstream_error(br#"{"error":{"message":"bad key"}}"#),
            "bad key"
        );
        assert_eq!(
            sanitize_upstream_error(br#"[{"error":{"code":429,"message":"quota"}}]"#),
            "quota"
        );
        assert_eq!(sanitize_upstream_error(b"plain failure"), "plain failure");
        let long = "é".repeat(400);
        let out = sanitize_upstream_error(long.as_bytes());
        assert!(out.ends_with("..."));
        assert!(out.len() <= 503);
    }
}
