use serde_json::Value;

use crate::error::RelayError;
use crate::stream::{CompletedTurn, FunctionCall, StreamEvent, TokenUsage, TurnDecoder};

use super::{ResponsesErrorBody, ResponsesFunctionCallItem, ResponsesStreamEvent, ResponsesUsage};

/// Read a `function_call` output item; other item types yield `None`.
///
/// Arguments that are missing or not a JSON object decode as empty, which
/// later fails tool-call validation instead of the stream.
#[must_use]
pub fn parse_function_call_item(item: &Value) -> Option<FunctionCall> {
    if item.get("type").and_then(Value::as_str) != Some("function_call") {
        return None;
    }
    let call: ResponsesFunctionCallItem = serde_json::from_value(item.clone()).ok()?;
    let args = serde_json::from_str(&call.arguments).unwrap_or_default();
    Some(FunctionCall {
        name: call.name,
        args,
        call_id: Some(call.call_id),
    })
}

fn usage_from_responses(usage: &ResponsesUsage) -> TokenUsage {
    TokenUsage {
        input_tokens: Some(usage.input_tokens),
        output_tokens: Some(usage.output_tokens),
        total_tokens: Some(
            usage
                .total_tokens
                .unwrap_or(usage.input_tokens + usage.output_tokens),
        ),
    }
}

fn stream_error(code: Option<&str>, message: &str) -> RelayError {
    let status = match code {
        Some("rate_limit_exceeded" | "insufficient_quota") => 429,
        _ => 500,
    };
    let message = match code {
        Some(code) => format!("{code}: {message}"),
        None => message.to_string(),
    };
    RelayError::Upstream { status, message }
}

/// Decoder for Responses API SSE payloads.
///
/// Output items finished mid-stream are kept as a fallback; the item list in
/// `response.completed` supersedes them when it arrives.
#[derive(Debug, Default)]
pub struct ResponsesStreamDecoder {
    done_items: Vec<Value>,
    completed_output: Option<Vec<Value>>,
    usage: Option<TokenUsage>,
}

impl ResponsesStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnDecoder for ResponsesStreamDecoder {
    fn decode(&mut self, payload: &str, out: &mut Vec<StreamEvent>) -> Result<(), RelayError> {
        let event = match serde_json::from_str::<ResponsesStreamEvent>(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(error = %err, "skipping undecodable Responses event");
                return Ok(());
            }
        };

        match event {
            ResponsesStreamEvent::OutputTextDelta { delta } => {
                if !delta.is_empty() {
                    out.push(StreamEvent::TextDelta(delta));
                }
            }
            ResponsesStreamEvent::OutputItemAdded { item } => {
                if let Some(call) = parse_function_call_item(&item) {
                    out.push(StreamEvent::FunctionCall(call));
                }
            }
            ResponsesStreamEvent::OutputItemDone { item } => self.done_items.push(item),
            ResponsesStreamEvent::ResponseCompleted { response }
            | ResponsesStreamEvent::ResponseIncomplete { response } => {
                self.usage = response.usage.as_ref().map(usage_from_responses);
                self.completed_output = Some(response.output);
            }
            ResponsesStreamEvent::ResponseFailed { response } => {
                let error = response.error.unwrap_or(ResponsesErrorBody {
                    code: None,
                    message: "response failed".into(),
                });
                return Err(stream_error(error.code.as_deref(), &error.message));
            }
            ResponsesStreamEvent::Error { code, message } => {
                return Err(stream_error(code.as_deref(), &message));
            }
            ResponsesStreamEvent::Other => {}
        }
        Ok(())
    }

    fn finish(&mut self) -> CompletedTurn {
        let output = self
            .completed_output
            .take()
            .unwrap_or_else(|| std::mem::take(&mut self.done_items));
        CompletedTurn {
            function_call: output.iter().find_map(parse_function_call_item),
            model_turn: output,
            usage: self.usage.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(decoder: &mut ResponsesStreamDecoder, payloads: &[&str]) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for payload in payloads {
            decoder.decode(payload, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn test_text_deltas() {
        let mut decoder = ResponsesStreamDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[
                r#"{"type":"response.created","response":{"id":"resp_1"}}"#,
                r#"{"type":"response.output_text.delta","output_index":0,"content_index":0,"delta":"Hi"}"#,
                r#"{"type":"response.output_text.delta","output_index":0,"content_index":0,"delta":" there"}"#,
                r#"{"type":"response.completed","response":{"output":[{"type":"message","role":"assistant","content":[{"type":"output_text","text":"Hi there"}]}],"usage":{"input_tokens":5,"output_tokens":2}}}"#,
            ],
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hi".into()),
                StreamEvent::TextDelta(" there".into()),
            ]
        );
        let completed = decoder.finish();
        assert!(completed.function_call.is_none());
        assert_eq!(completed.usage.unwrap().total_tokens, Some(7));
    }

    #[test]
    fn test_function_call_from_completed_output() {
        let mut decoder = ResponsesStreamDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[
                r#"{"type":"response.output_item.added","output_index":0,"item":{"type":"function_call","id":"fc_1","call_id":"call_1","name":"search_documents","arguments":""}}"#,
                r#"{"type":"response.function_call_arguments.delta","output_index":0,"delta":"{\"query\":"}"#,
                r#"{"type":"response.function_call_arguments.delta","output_index":0,"delta":"\"Acme brief\"}"}"#,
                r#"{"type":"response.completed","response":{"output":[{"type":"reasoning","id":"rs_1","summary":[]},{"type":"function_call","id":"fc_1","call_id":"call_1","name":"search_documents","arguments":"{\"query\":\"Acme brief\"}"}]}}"#,
            ],
        );
        assert_eq!(events.len(), 1);
        let StreamEvent::FunctionCall(provisional) = &events[0] else {
            panic!("expected provisional call");
        };
        assert!(provisional.args.is_empty());

        let completed = decoder.finish();
        let call = completed.function_call.unwrap();
        assert_eq!(call.call_id.as_deref(), Some("call_1"));
        assert_eq!(call.args["query"], "Acme brief");
        assert_eq!(completed.model_turn.len(), 2);
        assert_eq!(completed.model_turn[0]["type"], "reasoning");
    }

    #[test]
    fn test_done_items_used_without_completed_event() {
        let mut decoder = ResponsesStreamDecoder::new();
        decode_all(
            &mut decoder,
            &[r#"{"type":"response.output_item.done","output_index":0,"item":{"type":"function_call","call_id":"call_9","name":"search_documents","arguments":"{\"query\":\"x\"}"}}"#],
        );
        let completed = decoder.finish();
        assert_eq!(completed.function_call.unwrap().call_id.as_deref(), Some("call_9"));
    }

    #[test]
    fn test_error_events() {
        let mut decoder = ResponsesStreamDecoder::new();
        let mut out = Vec::new();
        let err = decoder
            .decode(
                r#"{"type":"error","code":"rate_limit_exceeded","message":"Slow down"}"#,
                &mut out,
            )
            .unwrap_err();
        assert!(err.is_rate_limited());

        let err = decoder
            .decode(
                r#"{"type":"response.failed","response":{"output":[],"error":{"code":"server_error","message":"boom"}}}"#,
                &mut out,
            )
            .unwrap_err();
        assert!(!err.is_rate_limited());
        assert!(err.to_string().contains("server_error: boom"));
    }

    #[test]
    fn test_invalid_arguments_decode_as_empty() {
        let call = parse_function_call_item(&json!({
            "type": "function_call",
            "call_id": "c",
            "name": "search_documents",
            "arguments": "{not json"
        }))
        .unwrap();
        assert!(call.args.is_empty());
        assert!(parse_function_call_item(&json!({"type": "message"})).is_none());
    }
}
