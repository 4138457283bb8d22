use serde_json::{json, Value};

use crate::error::RelayError;
use crate::protocol::{TurnRequest, TurnRole};
use crate::stream::CompletedTurn;
use crate::tool::{InlineAttachment, ToolDeclaration, ToolOutcome};

use super::{ResponsesRequest, ResponsesTool};

fn role_to_responses(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "user",
        TurnRole::Model => "assistant",
    }
}

/// Encode an opening turn as a streaming Responses API request.
#[must_use]
pub fn encode_responses_request(
    model: &str,
    turn: &TurnRequest,
    tool: Option<&ToolDeclaration>,
) -> ResponsesRequest {
    let mut input = Vec::with_capacity(turn.history.len() + 1);
    for prior in &turn.history {
        input.push(json!({
            "role": role_to_responses(prior.role),
            "content": prior.text,
        }));
    }
    input.push(json!({ "role": "user", "content": turn.user_content }));

    let tools = tool.map(|decl| {
        vec![ResponsesTool::Function {
            name: decl.name.clone(),
            description: Some(decl.description.clone()),
            parameters: Some(decl.parameters.clone()),
        }]
    });

    ResponsesRequest {
        model: model.to_string(),
        input,
        instructions: Some(turn.system_instruction.clone()),
        tools,
        stream: true,
    }
}

/// Encode the turn that resumes the conversation after a tool call: the
/// original input, the model's output items, then a `function_call_output`.
///
/// Attachments cannot ride on a `function_call_output`, so they follow as a
/// separate user message.
///
/// # Errors
///
/// Returns [`RelayError::Internal`] when the completed turn holds no function
/// call or the call has no `call_id`.
pub fn encode_responses_follow_up(
    model: &str,
    turn: &TurnRequest,
    tool: Option<&ToolDeclaration>,
    completed: &CompletedTurn,
    outcome: &ToolOutcome,
) -> Result<ResponsesRequest, RelayError> {
    let call_id = completed
        .function_call
        .as_ref()
        .and_then(|call| call.call_id.clone())
        .ok_or_else(|| {
            RelayError::Internal("follow-up turn requested without a function call id".into())
        })?;

    let mut request = encode_responses_request(model, turn, tool);
    request.input.extend(completed.model_turn.iter().cloned());
    request.input.push(json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": outcome.text,
    }));
    if !outcome.attachments.is_empty() {
        let content: Vec<Value> = outcome
            .attachments
            .iter()
            .enumerate()
            .map(|(index, attachment)| attachment_content(index, attachment))
            .collect();
        request
            .input
            .push(json!({ "role": "user", "content": content }));
    }
    Ok(request)
}

fn attachment_content(index: usize, attachment: &InlineAttachment) -> Value {
    let data_url = format!("data:{};base64,{}", attachment.mime_type, attachment.data);
    if attachment.mime_type.starts_with("image/") {
        json!({ "type": "input_image", "image_url": data_url })
    } else {
        json!({
            "type": "input_file",
            "filename": format!("attachment-{}", index + 1),
            "file_data": data_url,
        })
    }
}
