use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::{sanitize_upstream_error, RelayError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

fn build_reqwest_client(timeout: Duration) -> Result<reqwest::Client, RelayError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Parse an upstream endpoint.
///
/// # Errors
///
/// Returns [`RelayError::Config`] when `raw` is not a valid absolute URL.
pub fn parse_upstream_url(raw: &str) -> Result<url::Url, RelayError> {
    url::Url::parse(raw)
        .map_err(|err| RelayError::Config(format!("Invalid upstream URL '{raw}': {err}")))
}

/// HTTP client for model providers and the search collaborator.
///
/// Never retries on its own: rate-limit handling belongs to
/// [`RetryPolicy`](super::RetryPolicy), which wraps whole stream openings.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with connection pooling and the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the TLS backend cannot be initialised.
    pub fn new(config: &ServerConfig) -> Result<Self, RelayError> {
        let client = build_reqwest_client(Duration::from_secs(config.timeout))?;
        Ok(Self { client })
    }

    /// Shared client, reused by the search collaborator.
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// POST a JSON body and return the response once its status is known.
    ///
    /// The body is left unread so the caller can consume it as a stream.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the request cannot be sent, and
    /// [`RelayError::Upstream`] with a sanitized message for non-2xx statuses.
    pub async fn send_stream(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        let response = self
            .client
            .post(url.clone())
            .headers(headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|err| RelayError::Transport(format!("Upstream request failed: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        let message = sanitize_upstream_error(&body);
        tracing::warn!(
            status = status.as_u16(),
            host = url.host_str().unwrap_or_default(),
            message = %message,
            "upstream returned an error status"
        );
        Err(RelayError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}
