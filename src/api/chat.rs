use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::relay::parse_chat_request;
use crate::state::AppState;

/// `POST /api/chat`: validate the conversation and stream the answer as
/// plain text.
///
/// Validation and first-stream failures are answered with a JSON error and
/// a status code; once the body has started, failures are written into it.
pub async fn handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request_seq = state.next_request_seq();

    let request = match parse_chat_request(&body) {
        Ok(request) => request,
        Err(err) => {
            tracing::info!(request_seq, error = %err, "rejecting chat request");
            return err.into_response();
        }
    };
    tracing::debug!(
        request_seq,
        messages = request.messages().len(),
        "chat request accepted"
    );

    match state.relay.start(request_seq, &request).await {
        Ok(relay_body) => {
            let mut response = Response::new(Body::from_stream(relay_body));
            *response.status_mut() = StatusCode::OK;
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-transform"),
            );
            response
        }
        Err(err) => {
            tracing::error!(request_seq, error = %err, "failed to open model stream");
            err.into_response()
        }
    }
}
