//! Vertex AI `streamGenerateContent` without `alt=sse`.
//!
//! Requests use the Gemini wire format; the answer is a streamed JSON array
//! of `GenerateContentResponse` chunks.

use crate::error::RelayError;
use crate::protocol::gemini::stream::{
    check_in_band_error, parse_chunk, to_function_call, GeminiTurnAccumulator,
};
use crate::protocol::gemini::GeminiCandidate;
use crate::stream::{CompletedTurn, StreamEvent, TurnDecoder};

/// Finish reasons after which a chunk's text accessor refuses to answer.
const BLOCKED_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Joined visible text of a candidate, unless it was blocked.
fn text_accessor(candidate: &GeminiCandidate) -> Option<String> {
    if candidate
        .finish_reason
        .as_deref()
        .is_some_and(|reason| BLOCKED_FINISH_REASONS.contains(&reason))
    {
        return None;
    }
    let content = candidate.content.as_ref()?;
    let text: String = content
        .parts
        .iter()
        .filter_map(|part| part.visible_text())
        .collect();
    (!text.is_empty()).then_some(text)
}

/// First non-empty text field among the candidate's parts.
fn scan_parts_for_text(candidate: &GeminiCandidate) -> Option<String> {
    candidate
        .content
        .as_ref()?
        .parts
        .iter()
        .find_map(|part| part.text.as_deref().filter(|text| !text.is_empty()))
        .map(str::to_string)
}

/// Decoder for Vertex AI structured chunks.
///
/// Each chunk yields at most one text delta: the text accessor first, then
/// a scan of the parts when the accessor has nothing.
#[derive(Debug, Default)]
pub struct VertexChunkDecoder {
    turn: GeminiTurnAccumulator,
}

impl VertexChunkDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnDecoder for VertexChunkDecoder {
    fn decode(&mut self, payload: &str, out: &mut Vec<StreamEvent>) -> Result<(), RelayError> {
        let Some(response) = parse_chunk(payload) else {
            return Ok(());
        };
        check_in_band_error(&response)?;
        if let Some(usage) = &response.usage_metadata {
            self.turn.record_usage(usage);
        }
        let Some(candidate) = response.candidates.into_iter().next() else {
            return Ok(());
        };

        if let Some(text) = text_accessor(&candidate).or_else(|| scan_parts_for_text(&candidate)) {
            out.push(StreamEvent::TextDelta(text));
        }

        let Some(content) = candidate.content else {
            return Ok(());
        };
        if let Some(call) = content.parts.iter().find_map(|part| part.function_call.as_ref()) {
            out.push(StreamEvent::FunctionCall(to_function_call(call)));
        }
        for part in content.parts {
            self.turn.push_part(part);
        }
        Ok(())
    }

    fn finish(&mut self) -> CompletedTurn {
        self.turn.finish()
    }
}
