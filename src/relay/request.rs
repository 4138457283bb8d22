use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::protocol::{HistoryTurn, TurnRequest, TurnRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One message of the conversation posted by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Validated `POST /api/chat` body: a non-empty, chronologically ordered
/// conversation whose last message has non-empty content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] when `messages` is empty or its
    /// last message has blank content.
    pub fn new(messages: Vec<ChatMessage>) -> Result<Self, RelayError> {
        let Some(last) = messages.last() else {
            return Err(RelayError::InvalidRequest(
                "messages must contain at least one message".into(),
            ));
        };
        if last.content.trim().is_empty() {
            return Err(RelayError::InvalidRequest(
                "the last message must have non-empty content".into(),
            ));
        }
        Ok(Self { messages })
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Map the conversation onto a model turn.
    ///
    /// The last message becomes the new user content; earlier messages are
    /// history, minus client-side system messages (the deployment's own
    /// instruction replaces them).
    #[must_use]
    pub fn to_turn_request(&self, system_instruction: &str) -> TurnRequest {
        let (last, earlier) = self
            .messages
            .split_last()
            .map_or((None, &[][..]), |(last, earlier)| (Some(last), earlier));
        let history = earlier
            .iter()
            .filter_map(|message| {
                let role = match message.role {
                    Role::User => TurnRole::User,
                    Role::Assistant => TurnRole::Model,
                    Role::System => return None,
                };
                Some(HistoryTurn {
                    role,
                    text: message.content.clone(),
                })
            })
            .collect();
        TurnRequest {
            system_instruction: system_instruction.to_string(),
            history,
            user_content: last.map(|message| message.content.clone()).unwrap_or_default(),
        }
    }
}

/// Parse and validate a raw request body.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] when the body is not JSON,
/// `messages` is missing or not an array, any entry is not a
/// `{role, content}` object with a known role and string content, or the
/// conversation fails [`ChatRequest::new`].
pub fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, RelayError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| RelayError::InvalidRequest(format!("body is not valid JSON: {err}")))?;
    let Some(items) = value.get("messages").and_then(serde_json::Value::as_array) else {
        return Err(RelayError::InvalidRequest(
            "Invalid messages format: 'messages' must be an array".into(),
        ));
    };

    let mut messages = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let message = ChatMessage::deserialize(item)
            .map_err(|err| RelayError::InvalidRequest(format!("messages[{index}]: {err}")))?;
        messages.push(message);
    }
    ChatRequest::new(messages)
}
