use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;

use crate::config::ServerConfig;

const ALLOWED_METHODS: HeaderValue = HeaderValue::from_static("GET, POST, OPTIONS");
const ALLOWED_HEADERS: HeaderValue = HeaderValue::from_static("Content-Type, Authorization");
const MAX_AGE_SECS: HeaderValue = HeaderValue::from_static("86400");

/// Origins allowed to read responses, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    None,
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    #[must_use]
    pub fn from_config(server: &ServerConfig) -> Self {
        let origins: Vec<String> = server
            .cors_allowed_origins
            .iter()
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        if origins.iter().any(|origin| origin == "*") {
            AllowedOrigins::Any
        } else if origins.is_empty() {
            AllowedOrigins::None
        } else {
            AllowedOrigins::List(origins)
        }
    }

    /// `Access-Control-Allow-Origin` value for a request, if any.
    #[must_use]
    pub fn allow_origin(&self, request_headers: &HeaderMap) -> Option<HeaderValue> {
        match self {
            AllowedOrigins::None => None,
            AllowedOrigins::Any => Some(HeaderValue::from_static("*")),
            AllowedOrigins::List(origins) => {
                let origin = request_headers.get(header::ORIGIN)?;
                let value = origin.to_str().ok()?;
                origins
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(value))
                    .then(|| origin.clone())
            }
        }
    }

    /// Stamp CORS headers on an outgoing response.
    pub fn apply(&self, request_headers: &HeaderMap, response: &mut Response, preflight: bool) {
        let Some(allow_origin) = self.allow_origin(request_headers) else {
            return;
        };
        let headers = response.headers_mut();
        if matches!(self, AllowedOrigins::List(_)) {
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        if preflight {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS);
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS);
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, MAX_AGE_SECS);
        }
    }
}
