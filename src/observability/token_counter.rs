use crate::stream::TokenUsage;
use std::time::Duration;
use tracing::info;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Merge upstream-reported usage with local estimates.
///
/// Upstream non-zero values always win; estimates only fill missing or zero
/// fields, and the total is recomputed when absent.
#[must_use]
pub fn merge_usage(
    upstream: &TokenUsage,
    estimated_input: u64,
    estimated_output: u64,
) -> TokenUsage {
    let input_tokens = match upstream.input_tokens {
        Some(v) if v > 0 => Some(v),
        _ => Some(estimated_input),
    };

    let output_tokens = match upstream.output_tokens {
        Some(v) if v > 0 => Some(v),
        _ => Some(estimated_output),
    };

    let total_tokens = match upstream.total_tokens {
        Some(v) if v > 0 => Some(v),
        _ => Some(input_tokens.unwrap_or(0) + output_tokens.unwrap_or(0)),
    };

    TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens,
    }
}

/// Add one model turn's reported usage to a request's running total.
pub fn accumulate_usage(total: &mut Option<TokenUsage>, turn: Option<&TokenUsage>) {
    let Some(turn) = turn else {
        return;
    };
    let Some(sum) = total.as_mut() else {
        *total = Some(turn.clone());
        return;
    };
    let add = |a: Option<u64>, b: Option<u64>| match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    };
    sum.input_tokens = add(sum.input_tokens, turn.input_tokens);
    sum.output_tokens = add(sum.output_tokens, turn.output_tokens);
    sum.total_tokens = add(sum.total_tokens, turn.total_tokens);
}

/// Log token usage for a completed turn at INFO level.
pub fn log_turn_usage(request_seq: u64, model: &str, usage: &TokenUsage, duration: Duration) {
    info!(
        request_seq,
        model = model,
        input_tokens = usage.input_tokens.unwrap_or(0),
        output_tokens = usage.output_tokens.unwrap_or(0),
        total_tokens = usage.total_tokens.unwrap_or(0),
        duration_seconds = duration.as_secs_f64(),
        "turn completed"
    );
}
