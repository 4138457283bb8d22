use crate::error::RelayError;
use crate::protocol::gemini::{
    GeminiBlob, GeminiContent, GeminiFunctionDeclaration, GeminiFunctionResponse, GeminiPart,
    GeminiRequest, GeminiToolDeclaration,
};
use crate::protocol::{TurnRequest, TurnRole};
use crate::stream::CompletedTurn;
use crate::tool::{ToolDeclaration, ToolOutcome};

fn role_to_gemini(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "user",
        TurnRole::Model => "model",
    }
}

/// Encode an opening turn: system instruction, prior turns and the new user text.
#[must_use]
pub fn encode_gemini_request(turn: &TurnRequest, tool: Option<&ToolDeclaration>) -> GeminiRequest {
    let mut contents = Vec::with_capacity(turn.history.len() + 1);
    for prior in &turn.history {
        contents.push(GeminiContent {
            role: Some(role_to_gemini(prior.role).to_string()),
            parts: vec![GeminiPart::text(prior.text.clone())],
        });
    }
    contents.push(GeminiContent {
        role: Some("user".into()),
        parts: vec![GeminiPart::text(turn.user_content.clone())],
    });

    let system_instruction = Some(GeminiContent {
        role: None,
        parts: vec![GeminiPart::text(turn.system_instruction.clone())],
    });

    let tools = tool.map(|decl| {
        vec![GeminiToolDeclaration {
            function_declarations: vec![GeminiFunctionDeclaration {
                name: decl.name.clone(),
                description: Some(decl.description.clone()),
                parameters: Some(decl.parameters.clone()),
            }],
        }]
    });

    GeminiRequest {
        contents,
        tools,
        system_instruction,
    }
}

/// Encode the turn that resumes the conversation after a tool call.
///
/// The model's own turn is replayed as received, followed by a `user`
/// content carrying the function response and any inline attachments.
///
/// # Errors
///
/// Returns [`RelayError::Internal`] when the completed turn holds no function
/// call or its recorded content cannot be replayed.
pub fn encode_gemini_follow_up(
    turn: &TurnRequest,
    tool: Option<&ToolDeclaration>,
    completed: &CompletedTurn,
    outcome: &ToolOutcome,
) -> Result<GeminiRequest, RelayError> {
    let call = completed.function_call.as_ref().ok_or_else(|| {
        RelayError::Internal("follow-up turn requested without a function call".into())
    })?;

    let mut request = encode_gemini_request(turn, tool);
    for item in &completed.model_turn {
        let content: GeminiContent = serde_json::from_value(item.clone()).map_err(|err| {
            RelayError::Internal(format!("recorded model turn is not Gemini content: {err}"))
        })?;
        request.contents.push(content);
    }

    let mut parts = Vec::with_capacity(1 + outcome.attachments.len());
    parts.push(GeminiPart {
        function_response: Some(GeminiFunctionResponse {
            name: call.name.clone(),
            response: serde_json::json!({ "content": outcome.text }),
            id: call.call_id.clone(),
        }),
        ..GeminiPart::default()
    });
    parts.extend(outcome.attachments.iter().map(|attachment| GeminiPart {
        inline_data: Some(GeminiBlob {
            mime_type: attachment.mime_type.clone(),
            data: attachment.data.clone(),
        }),
        ..GeminiPart::default()
    }));
    request.contents.push(GeminiContent {
        role: Some("user".into()),
        parts,
    });

    Ok(request)
}
