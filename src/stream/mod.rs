pub mod decoder;
pub mod json_array;
pub mod sse;
pub mod thinking;

pub use decoder::{decode_event_stream, Framing, TurnDecoder};
pub use json_array::JsonArraySplitter;
pub use sse::SseParser;
pub use thinking::{ThinkingFilter, ThinkingTags};

use std::pin::Pin;

use futures_util::Stream;

use crate::error::RelayError;

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: serde_json::Map<String, serde_json::Value>,
    /// Provider call id, echoed back with the function result when present.
    pub call_id: Option<String>,
}

/// Token usage reported for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// Aggregated end-of-turn response, available once a stream is exhausted.
///
/// `function_call` is authoritative; provisional [`StreamEvent::FunctionCall`]
/// markers seen mid-stream only announce that one is coming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletedTurn {
    pub function_call: Option<FunctionCall>,
    /// Provider-native items that represent the model's side of this turn,
    /// replayed verbatim when the conversation resumes after a tool call.
    pub model_turn: Vec<serde_json::Value>,
    pub usage: Option<TokenUsage>,
}

/// One decoded model-output event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    FunctionCall(FunctionCall),
    End(CompletedTurn),
}

/// Lazily produced, consumed-once sequence of model-output events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, RelayError>> + Send>>;
