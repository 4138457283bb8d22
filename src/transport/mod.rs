mod http_transport;
mod retry_policy;

pub use http_transport::{parse_upstream_url, HttpTransport};
pub use retry_policy::RetryPolicy;
