//! Streams one chat request end to end: open the model turn, relay scrubbed
//! text as it arrives, run at most one tool round trip, and close.

pub mod request;

pub use request::{parse_chat_request, ChatMessage, ChatRequest, Role};

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{RelayError, RATE_LIMIT_NOTICE};
use crate::observability::log_turn_complete;
use crate::observability::token_counter::accumulate_usage;
use crate::protocol::TurnRequest;
use crate::provider::{ModelClient, TurnInput};
use crate::stream::{
    CompletedTurn, EventStream, StreamEvent, ThinkingFilter, ThinkingTags, TokenUsage,
};
use crate::tool::{validate_call, SearchTool, ToolDeclaration};
use crate::transport::RetryPolicy;

/// Written when a turn produced neither text nor a tool call.
pub const EMPTY_RESPONSE_NOTICE: &str =
    "The model returned an empty response. Please try rephrasing your question.";

/// Written when the turn after a tool call produced no visible text.
pub const TOOL_FALLBACK_NOTICE: &str = "I searched the documents but could not put together \
     an answer from them. Please try rephrasing your question.";

/// Chunks buffered between the relay task and the client connection.
const CLIENT_CHANNEL_CAPACITY: usize = 16;

/// Streamed response body, fed by the relay task.
pub type RelayBody = std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>>;

/// Plain-text rendering of an error raised after the response has started.
#[must_use]
pub fn stream_error_text(err: &RelayError) -> String {
    if err.is_rate_limited() {
        RATE_LIMIT_NOTICE.to_string()
    } else {
        err.to_string()
    }
}

/// Why relaying stopped before the turn finished.
#[derive(Debug)]
enum RelayStop {
    /// The client went away; upstream consumption is abandoned.
    ClientGone,
    Failed(RelayError),
}

impl From<RelayError> for RelayStop {
    fn from(err: RelayError) -> Self {
        RelayStop::Failed(err)
    }
}

/// Writes relayed text to the client, suspending while the client is slow.
struct ClientSink {
    tx: mpsc::Sender<Bytes>,
    relayed: String,
}

impl ClientSink {
    /// Returns whether anything was written.
    async fn write(&mut self, text: &str) -> Result<bool, RelayStop> {
        if text.is_empty() {
            return Ok(false);
        }
        self.tx
            .send(Bytes::copy_from_slice(text.as_bytes()))
            .await
            .map_err(|_| RelayStop::ClientGone)?;
        self.relayed.push_str(text);
        Ok(true)
    }

    fn ensure_connected(&self) -> Result<(), RelayStop> {
        if self.tx.is_closed() {
            Err(RelayStop::ClientGone)
        } else {
            Ok(())
        }
    }
}

/// What one relayed model stream amounted to.
#[derive(Debug, Default)]
struct StreamSummary {
    wrote_text: bool,
    announced_call: bool,
    completed: CompletedTurn,
}

/// Response relay shared by every request of the process.
pub struct ChatRelay {
    model: Arc<dyn ModelClient>,
    search: Option<(ToolDeclaration, Arc<dyn SearchTool>)>,
    retry: RetryPolicy,
    tags: ThinkingTags,
    system_prompt: String,
}

impl ChatRelay {
    #[must_use]
    pub fn new(
        model: Arc<dyn ModelClient>,
        retry: RetryPolicy,
        tags: ThinkingTags,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model,
            search: None,
            retry,
            tags,
            system_prompt: system_prompt.into(),
        }
    }

    /// Enable the single search tool the model may call.
    #[must_use]
    pub fn with_search_tool(
        mut self,
        declaration: ToolDeclaration,
        tool: Arc<dyn SearchTool>,
    ) -> Self {
        self.search = Some((declaration, tool));
        self
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.model.model()
    }

    #[must_use]
    pub fn tool_enabled(&self) -> bool {
        self.search.is_some()
    }

    fn declaration(&self) -> Option<&ToolDeclaration> {
        self.search.as_ref().map(|(declaration, _)| declaration)
    }

    /// Open the first model stream and hand back the response body.
    ///
    /// Everything that can fail before a byte is written fails here, so the
    /// caller can still answer with a status code. Relaying continues on a
    /// spawned task until the turn ends or the body is dropped.
    ///
    /// # Errors
    ///
    /// Returns the error that prevented the first stream from opening, after
    /// rate-limit retries.
    pub async fn start(
        self: &Arc<Self>,
        request_seq: u64,
        request: &ChatRequest,
    ) -> Result<RelayBody, RelayError> {
        let started = Instant::now();
        let turn = request.to_turn_request(&self.system_prompt);
        tracing::info!(
            request_seq,
            model = %self.model_name(),
            history_len = turn.history.len(),
            "opening model turn"
        );

        let first = self
            .retry
            .run("open_stream", |_attempt| {
                self.model.open_turn_stream(TurnInput::Open(&turn))
            })
            .await?;

        let (tx, mut rx) = mpsc::channel::<Bytes>(CLIENT_CHANNEL_CAPACITY);
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            relay.run(request_seq, started, turn, first, tx).await;
        });

        Ok(Box::pin(futures_util::stream::poll_fn(move |cx| {
            rx.poll_recv(cx).map(|chunk| chunk.map(Ok::<Bytes, Infallible>))
        })))
    }

    async fn run(
        &self,
        request_seq: u64,
        started: Instant,
        turn: TurnRequest,
        first: EventStream,
        tx: mpsc::Sender<Bytes>,
    ) {
        let mut sink = ClientSink {
            tx,
            relayed: String::new(),
        };
        let mut usage = None;

        match self.relay_turns(&turn, first, &mut sink, &mut usage).await {
            Ok(()) => {}
            Err(RelayStop::ClientGone) => {
                tracing::info!(request_seq, "client disconnected, abandoning model stream");
                return;
            }
            Err(RelayStop::Failed(err)) => {
                tracing::warn!(request_seq, error = %err, "relay failed after the response started");
                let separator = if sink.relayed.is_empty() { "" } else { "\n\n" };
                let text = format!("{separator}{}", stream_error_text(&err));
                // Nothing left to do if the client is already gone.
                let _ = sink.write(&text).await;
            }
        }

        log_turn_complete(
            request_seq,
            self.model_name(),
            usage.as_ref(),
            turn.prompt_bytes(),
            &sink.relayed,
            started,
        );
    }

    async fn relay_turns(
        &self,
        turn: &TurnRequest,
        first: EventStream,
        sink: &mut ClientSink,
        usage: &mut Option<TokenUsage>,
    ) -> Result<(), RelayStop> {
        let first = self.relay_stream(first, sink).await?;
        accumulate_usage(usage, first.completed.usage.as_ref());

        let Some(call) = first.completed.function_call.as_ref() else {
            if first.announced_call {
                return Err(RelayError::InvalidToolCall(
                    "the model announced a tool call but never completed it".into(),
                )
                .into());
            }
            if !first.wrote_text {
                tracing::warn!("model turn produced no text and no tool call");
                sink.write(EMPTY_RESPONSE_NOTICE).await?;
            }
            return Ok(());
        };

        let query = validate_call(call, self.declaration())?;
        let Some((_, tool)) = &self.search else {
            return Err(RelayError::Internal("tool call validated without a tool".into()).into());
        };

        sink.ensure_connected()?;
        tracing::info!(tool = %call.name, "invoking tool");
        let outcome = tool.search(&query).await;
        tracing::debug!(
            text_len = outcome.text.len(),
            attachments = outcome.attachments.len(),
            "tool finished"
        );

        sink.ensure_connected()?;
        let second = self
            .retry
            .run("open_follow_up_stream", |_attempt| {
                self.model.open_turn_stream(TurnInput::ToolResult {
                    request: turn,
                    completed: &first.completed,
                    outcome: &outcome,
                })
            })
            .await?;

        let second = self.relay_stream(second, sink).await?;
        accumulate_usage(usage, second.completed.usage.as_ref());
        if second.announced_call || second.completed.function_call.is_some() {
            tracing::warn!("ignoring a second tool call, only one tool call is served per message");
        }
        if !second.wrote_text {
            sink.write(TOOL_FALLBACK_NOTICE).await?;
        }
        Ok(())
    }

    /// Relay one model stream through a fresh thinking filter.
    async fn relay_stream(
        &self,
        mut stream: EventStream,
        sink: &mut ClientSink,
    ) -> Result<StreamSummary, RelayStop> {
        let mut filter = ThinkingFilter::new(self.tags.clone());
        let mut summary = StreamSummary::default();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta(text) => {
                    let visible = filter.process(&text);
                    summary.wrote_text |= sink.write(&visible).await?;
                }
                StreamEvent::FunctionCall(call) => {
                    tracing::debug!(tool = %call.name, "model announced a tool call");
                    summary.announced_call = true;
                }
                StreamEvent::End(completed) => {
                    summary.completed = completed;
                    break;
                }
            }
        }

        summary.wrote_text |= sink.write(&filter.finish()).await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_text() {
        let err = RelayError::Upstream {
            status: 429,
            message: "quota".into(),
        };
        assert_eq!(stream_error_text(&err), RATE_LIMIT_NOTICE);
        let err = RelayError::InvalidToolCall("unknown tool 'x'".into());
        assert_eq!(stream_error_text(&err), "Invalid tool call: unknown tool 'x'");
    }
}
