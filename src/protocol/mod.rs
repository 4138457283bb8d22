pub mod gemini;
pub mod openai_responses;
pub mod vertex;

/// Speaker of a prior turn, in provider-neutral terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    /// The model's own earlier replies (`assistant` on the client side).
    Model,
}

/// One earlier exchange carried as conversational context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: TurnRole,
    pub text: String,
}

/// Outbound model turn: fixed instruction, prior turns, and the new user text.
///
/// Built fresh per request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub system_instruction: String,
    pub history: Vec<HistoryTurn>,
    pub user_content: String,
}

impl TurnRequest {
    /// Total text size sent to the model, used for usage estimates.
    #[must_use]
    pub fn prompt_bytes(&self) -> usize {
        self.system_instruction.len()
            + self.user_content.len()
            + self.history.iter().map(|turn| turn.text.len()).sum::<usize>()
    }
}
