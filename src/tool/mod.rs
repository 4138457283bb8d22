use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{sanitize_upstream_error, RelayError};
use crate::stream::FunctionCall;

/// Binary part returned by a search, sent back to the model inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineAttachment {
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

/// Result of one tool invocation.
///
/// Failures are outcomes too: their text tells the model what went wrong so
/// it can still answer in natural language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<InlineAttachment>,
}

impl ToolOutcome {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

/// Function declaration advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolDeclaration {
    /// A document search taking a single required string `query`.
    #[must_use]
    pub fn search(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search terms, e.g. a client or project name."
                    }
                },
                "required": ["query"]
            }),
        }
    }
}

/// External document-search collaborator.
#[async_trait]
pub trait SearchTool: Send + Sync {
    /// Run a search. Never fails; problems are reported in the outcome text.
    async fn search(&self, query: &str) -> ToolOutcome;
}

/// Check a model-issued call against the declared tool and extract its query.
///
/// # Errors
///
/// Returns [`RelayError::InvalidToolCall`] when no tool is declared, the name
/// does not match, or `query` is missing or not a non-empty string.
pub fn validate_call(
    call: &FunctionCall,
    declaration: Option<&ToolDeclaration>,
) -> Result<String, RelayError> {
    let Some(declaration) = declaration else {
        return Err(RelayError::InvalidToolCall(format!(
            "the model requested tool '{}' but no tools are enabled",
            call.name
        )));
    };
    if call.name != declaration.name {
        return Err(RelayError::InvalidToolCall(format!(
            "unknown tool '{}'",
            call.name
        )));
    }
    match call.args.get("query").and_then(Value::as_str) {
        Some(query) if !query.trim().is_empty() => Ok(query.to_string()),
        _ => Err(RelayError::InvalidToolCall(format!(
            "tool '{}' requires a non-empty string argument 'query'",
            call.name
        ))),
    }
}

/// Search collaborator reached over HTTP.
///
/// Sends `POST {endpoint}` with `{"query": ...}` and expects a
/// [`ToolOutcome`] JSON body.
#[derive(Debug, Clone)]
pub struct HttpSearchTool {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpSearchTool {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SearchTool for HttpSearchTool {
    async fn search(&self, query: &str) -> ToolOutcome {
        tracing::debug!(endpoint = %self.endpoint, "calling document search");
        let response = match self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&json!({ "query": query }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "document search request failed");
                return ToolOutcome::text(format!("Document search is unavailable: {err}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let message = sanitize_upstream_error(&body);
            tracing::warn!(status = status.as_u16(), message = %message, "document search returned an error");
            return ToolOutcome::text(format!(
                "Document search failed with status {}: {message}",
                status.as_u16()
            ));
        }

        match response.json::<ToolOutcome>().await {
            Ok(outcome) => {
                tracing::debug!(
                    text_len = outcome.text.len(),
                    attachments = outcome.attachments.len(),
                    "document search completed"
                );
                outcome
            }
            Err(err) => {
                tracing::warn!(error = %err, "document search returned an unreadable body");
                ToolOutcome::text(format!("Document search returned an unreadable result: {err}"))
            }
        }
    }
}
