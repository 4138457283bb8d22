use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::RelayError;
use crate::protocol::gemini::encoder::{encode_gemini_follow_up, encode_gemini_request};
use crate::protocol::gemini::stream::GeminiStreamDecoder;
use crate::protocol::openai_responses::encoder::{
    encode_responses_follow_up, encode_responses_request,
};
use crate::protocol::openai_responses::stream::ResponsesStreamDecoder;
use crate::protocol::vertex::VertexChunkDecoder;
use crate::protocol::TurnRequest;
use crate::stream::{decode_event_stream, CompletedTurn, EventStream, Framing, TurnDecoder};
use crate::tool::{ToolDeclaration, ToolOutcome};
use crate::transport::{parse_upstream_url, HttpTransport};

/// What a model stream is opened for.
#[derive(Debug, Clone, Copy)]
pub enum TurnInput<'a> {
    /// The user's new message on top of the conversation so far.
    Open(&'a TurnRequest),
    /// Resume after a tool call: the same conversation, the model's turn
    /// that requested the call, and the tool's result.
    ToolResult {
        request: &'a TurnRequest,
        completed: &'a CompletedTurn,
        outcome: &'a ToolOutcome,
    },
}

impl TurnInput<'_> {
    fn is_follow_up(&self) -> bool {
        matches!(self, TurnInput::ToolResult { .. })
    }
}

/// A hosted model that answers a turn with a stream of events.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    /// Open a streamed model turn.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Upstream`] for non-2xx answers (rate limits
    /// included) and [`RelayError::Transport`] when the provider is unreachable.
    async fn open_turn_stream(&self, input: TurnInput<'_>) -> Result<EventStream, RelayError>;
}

/// Endpoint and static headers, resolved once at startup.
#[derive(Debug, Clone)]
struct PreparedEndpoint {
    url: url::Url,
    headers: http::HeaderMap,
}

enum Auth<'a> {
    Bearer(&'a str),
    GoogApiKey(&'a str),
}

impl PreparedEndpoint {
    fn new(raw_url: &str, auth: Auth<'_>) -> Result<Self, RelayError> {
        let url = parse_upstream_url(raw_url)?;
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        let (name, value) = match auth {
            Auth::Bearer(key) => (http::header::AUTHORIZATION, format!("Bearer {key}")),
            Auth::GoogApiKey(key) => (
                http::HeaderName::from_static("x-goog-api-key"),
                key.to_string(),
            ),
        };
        let mut value = http::HeaderValue::from_str(&value).map_err(|_| {
            RelayError::Config("api key contains characters not allowed in a header".into())
        })?;
        value.set_sensitive(true);
        headers.insert(name, value);
        Ok(Self { url, headers })
    }

    async fn open<T, D>(
        &self,
        transport: &HttpTransport,
        body: &T,
        framing: Framing,
        decoder: D,
    ) -> Result<EventStream, RelayError>
    where
        T: Serialize + Sync,
        D: TurnDecoder,
    {
        let body = serde_json::to_vec(body)
            .map_err(|err| RelayError::Internal(format!("Failed to encode request: {err}")))?;
        let response = transport
            .send_stream(&self.url, &self.headers, bytes::Bytes::from(body))
            .await?;
        Ok(decode_event_stream(response.bytes_stream(), framing, decoder))
    }
}

/// `OpenAI` Responses API over SSE.
pub struct OpenAiResponsesClient {
    transport: HttpTransport,
    endpoint: PreparedEndpoint,
    model: String,
    tool: Option<ToolDeclaration>,
}

impl OpenAiResponsesClient {
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] for an unusable base URL or API key.
    pub fn new(
        transport: HttpTransport,
        config: &ProviderConfig,
        tool: Option<ToolDeclaration>,
    ) -> Result<Self, RelayError> {
        let url = format!("{}/responses", config.resolved_base_url());
        Ok(Self {
            transport,
            endpoint: PreparedEndpoint::new(&url, Auth::Bearer(&config.api_key))?,
            model: config.effective_model().to_string(),
            tool,
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiResponsesClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn open_turn_stream(&self, input: TurnInput<'_>) -> Result<EventStream, RelayError> {
        tracing::debug!(
            provider = "openai-responses",
            model = %self.model,
            follow_up = input.is_follow_up(),
            "opening model stream"
        );
        let tool = self.tool.as_ref();
        let body = match input {
            TurnInput::Open(request) => encode_responses_request(&self.model, request, tool),
            TurnInput::ToolResult {
                request,
                completed,
                outcome,
            } => encode_responses_follow_up(&self.model, request, tool, completed, outcome)?,
        };
        self.endpoint
            .open(
                &self.transport,
                &body,
                Framing::Sse,
                ResponsesStreamDecoder::new(),
            )
            .await
    }
}

/// Gemini `streamGenerateContent` over SSE.
pub struct GeminiClient {
    transport: HttpTransport,
    endpoint: PreparedEndpoint,
    model: String,
    tool: Option<ToolDeclaration>,
}

impl GeminiClient {
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] for an unusable base URL or API key.
    pub fn new(
        transport: HttpTransport,
        config: &ProviderConfig,
        tool: Option<ToolDeclaration>,
    ) -> Result<Self, RelayError> {
        let model = config.effective_model().to_string();
        let url = format!(
            "{}/models/{model}:streamGenerateContent?alt=sse",
            config.resolved_base_url()
        );
        Ok(Self {
            transport,
            endpoint: PreparedEndpoint::new(&url, Auth::GoogApiKey(&config.api_key))?,
            model,
            tool,
        })
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn open_turn_stream(&self, input: TurnInput<'_>) -> Result<EventStream, RelayError> {
        tracing::debug!(
            provider = "gemini",
            model = %self.model,
            follow_up = input.is_follow_up(),
            "opening model stream"
        );
        let body = encode_gemini_input(input, self.tool.as_ref())?;
        self.endpoint
            .open(
                &self.transport,
                &body,
                Framing::Sse,
                GeminiStreamDecoder::new(),
            )
            .await
    }
}

/// Vertex AI `streamGenerateContent`, answered as a streamed JSON array.
pub struct VertexClient {
    transport: HttpTransport,
    endpoint: PreparedEndpoint,
    model: String,
    tool: Option<ToolDeclaration>,
}

impl VertexClient {
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the project is missing or the base
    /// URL or access token is unusable.
    pub fn new(
        transport: HttpTransport,
        config: &ProviderConfig,
        tool: Option<ToolDeclaration>,
    ) -> Result<Self, RelayError> {
        let project = config
            .project
            .as_deref()
            .map(str::trim)
            .filter(|project| !project.is_empty())
            .ok_or_else(|| RelayError::Config("vertex provider requires a project".into()))?;
        let model = config.effective_model().to_string();
        let url = format!(
            "{}/v1/projects/{project}/locations/{}/publishers/google/models/{model}:streamGenerateContent",
            config.resolved_base_url(),
            config.location.trim(),
        );
        Ok(Self {
            transport,
            endpoint: PreparedEndpoint::new(&url, Auth::Bearer(&config.api_key))?,
            model,
            tool,
        })
    }
}

#[async_trait]
impl ModelClient for VertexClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn open_turn_stream(&self, input: TurnInput<'_>) -> Result<EventStream, RelayError> {
        tracing::debug!(
            provider = "vertex",
            model = %self.model,
            follow_up = input.is_follow_up(),
            "opening model stream"
        );
        let body = encode_gemini_input(input, self.tool.as_ref())?;
        self.endpoint
            .open(
                &self.transport,
                &body,
                Framing::JsonArray,
                VertexChunkDecoder::new(),
            )
            .await
    }
}

fn encode_gemini_input(
    input: TurnInput<'_>,
    tool: Option<&ToolDeclaration>,
) -> Result<crate::protocol::gemini::GeminiRequest, RelayError> {
    match input {
        TurnInput::Open(request) => Ok(encode_gemini_request(request, tool)),
        TurnInput::ToolResult {
            request,
            completed,
            outcome,
        } => encode_gemini_follow_up(request, tool, completed, outcome),
    }
}

/// Build the adapter for the configured provider.
///
/// # Errors
///
/// Returns [`RelayError::Config`] when the provider settings are unusable.
pub fn build_model_client(
    transport: HttpTransport,
    config: &ProviderConfig,
    tool: Option<ToolDeclaration>,
) -> Result<Arc<dyn ModelClient>, RelayError> {
    Ok(match config.kind {
        ProviderKind::Gemini => Arc::new(GeminiClient::new(transport, config, tool)?),
        ProviderKind::OpenaiResponses => {
            Arc::new(OpenAiResponsesClient::new(transport, config, tool)?)
        }
        ProviderKind::Vertex => Arc::new(VertexClient::new(transport, config, tool)?),
    })
}
