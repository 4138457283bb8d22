pub mod token_counter;

use crate::stream::TokenUsage;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Log usage for one relayed turn, computing duration from start time.
///
/// `prompt_bytes` and `relayed_text` back the input and output estimates
/// when the provider reported no usage.
pub fn log_turn_complete(
    request_seq: u64,
    model: &str,
    usage: Option<&TokenUsage>,
    prompt_bytes: usize,
    relayed_text: &str,
    start_time: std::time::Instant,
) {
    let upstream = usage.cloned().unwrap_or_default();
    let merged = token_counter::merge_usage(
        &upstream,
        (prompt_bytes as u64).div_ceil(4),
        token_counter::estimate_tokens(relayed_text),
    );
    token_counter::log_turn_usage(request_seq, model, &merged, start_time.elapsed());
}
