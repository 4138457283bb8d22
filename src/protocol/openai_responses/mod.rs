pub mod encoder;
pub mod stream;

use serde::{Deserialize, Serialize};

/// `OpenAI` Responses API request wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    /// Input items: role messages, replayed output items, tool results.
    pub input: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,
    pub stream: bool,
}

/// A tool in the Responses API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesTool {
    #[serde(rename = "function")]
    Function {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parameters: Option<serde_json::Value>,
    },
}

/// Snapshot of the response carried by lifecycle events.
///
/// Output items stay raw JSON: they are replayed as input on the next turn,
/// and item types the relay does not know (reasoning, for example) must
/// survive untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesSnapshot {
    #[serde(default)]
    pub output: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponsesErrorBody>,
}

/// Usage in the Responses API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// A `function_call` output item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesFunctionCallItem {
    pub call_id: String,
    pub name: String,
    /// JSON-encoded arguments; complete only once the item is done.
    #[serde(default)]
    pub arguments: String,
}

/// Responses API streaming events the relay acts on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesStreamEvent {
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: serde_json::Value },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: serde_json::Value },
    #[serde(rename = "response.completed")]
    ResponseCompleted { response: ResponsesSnapshot },
    #[serde(rename = "response.incomplete")]
    ResponseIncomplete { response: ResponsesSnapshot },
    #[serde(rename = "response.failed")]
    ResponseFailed { response: ResponsesSnapshot },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: String,
    },
    /// Lifecycle and delta events with no effect on the relayed text.
    #[serde(other)]
    Other,
}
