use crate::error::RelayError;
use crate::protocol::gemini::{
    GeminiContent, GeminiFunctionCall, GeminiPart, GeminiResponse, GeminiUsageMetadata,
};
use crate::stream::{CompletedTurn, FunctionCall, StreamEvent, TokenUsage, TurnDecoder};

/// Builds the model's side of a turn from streamed Gemini chunks.
///
/// Consecutive plain-text parts are merged; every other part is kept as
/// received so it can be replayed verbatim in a follow-up turn.
#[derive(Debug, Default)]
pub struct GeminiTurnAccumulator {
    parts: Vec<GeminiPart>,
    usage: Option<TokenUsage>,
}

fn is_plain_text(part: &GeminiPart) -> bool {
    part.text.is_some()
        && part.function_call.is_none()
        && part.function_response.is_none()
        && part.inline_data.is_none()
        && part.extra.is_empty()
}

impl GeminiTurnAccumulator {
    pub fn push_part(&mut self, part: GeminiPart) {
        if let (Some(last), Some(text)) = (self.parts.last_mut(), part.text.as_deref()) {
            if is_plain_text(last) && is_plain_text(&part) && last.thought == part.thought {
                last.text.get_or_insert_with(String::new).push_str(text);
                return;
            }
        }
        self.parts.push(part);
    }

    pub fn record_usage(&mut self, usage: &GeminiUsageMetadata) {
        self.usage = Some(TokenUsage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        });
    }

    #[must_use]
    pub fn finish(&mut self) -> CompletedTurn {
        let parts = std::mem::take(&mut self.parts);
        let function_call = parts
            .iter()
            .find_map(|part| part.function_call.as_ref())
            .map(to_function_call);
        let model_turn = if parts.is_empty() {
            Vec::new()
        } else {
            let content = GeminiContent {
                role: Some("model".into()),
                parts,
            };
            serde_json::to_value(&content).into_iter().collect()
        };
        CompletedTurn {
            function_call,
            model_turn,
            usage: self.usage.take(),
        }
    }
}

pub(crate) fn to_function_call(call: &GeminiFunctionCall) -> FunctionCall {
    FunctionCall {
        name: call.name.clone(),
        args: call.args.clone(),
        call_id: call.id.clone(),
    }
}

/// Surface an error object sent in place of candidates.
pub(crate) fn check_in_band_error(response: &GeminiResponse) -> Result<(), RelayError> {
    let Some(error) = &response.error else {
        return Ok(());
    };
    let message = match &error.status {
        Some(status) => format!("{status}: {}", error.message),
        None => error.message.clone(),
    };
    Err(RelayError::Upstream {
        status: error.code.unwrap_or(500),
        message,
    })
}

/// Parse one chunk, skipping anything that is not a `GenerateContentResponse`.
pub(crate) fn parse_chunk(payload: &str) -> Option<GeminiResponse> {
    match serde_json::from_str::<GeminiResponse>(payload) {
        Ok(response) => Some(response),
        Err(err) => {
            tracing::debug!(error = %err, "skipping undecodable Gemini chunk");
            None
        }
    }
}

/// Decoder for `streamGenerateContent?alt=sse` payloads.
///
/// Text comes from each part of the first candidate as it arrives; a
/// `functionCall` part raises a provisional [`StreamEvent::FunctionCall`].
#[derive(Debug, Default)]
pub struct GeminiStreamDecoder {
    turn: GeminiTurnAccumulator,
}

impl GeminiStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnDecoder for GeminiStreamDecoder {
    fn decode(&mut self, payload: &str, out: &mut Vec<StreamEvent>) -> Result<(), RelayError> {
        let Some(response) = parse_chunk(payload) else {
            return Ok(());
        };
        check_in_band_error(&response)?;
        if let Some(usage) = &response.usage_metadata {
            self.turn.record_usage(usage);
        }

        let Some(content) = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
        else {
            return Ok(());
        };

        for part in content.parts {
            if let Some(text) = part.visible_text() {
                out.push(StreamEvent::TextDelta(text.to_string()));
            }
            if let Some(call) = &part.function_call {
                out.push(StreamEvent::FunctionCall(to_function_call(call)));
            }
            self.turn.push_part(part);
        }
        Ok(())
    }

    fn finish(&mut self) -> CompletedTurn {
        self.turn.finish()
    }
}
