use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a summary of the active provider.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "chat-relay is running",
        "provider": {
            "kind": config.provider.kind.to_string(),
            "model": state.relay.model_name(),
        },
        "tool_enabled": state.relay.tool_enabled(),
        "features": {
            "log_level": config.features.log_level,
        }
    }))
}
