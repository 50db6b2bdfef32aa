//! Conversation state: which step of the intake the user is in.

use serde::{Deserialize, Serialize};

/// The steps of an incident-report conversation.
///
/// Progresses linearly: AwaitingSeverity → AwaitingAttachment →
/// AwaitingDescription → Done. Cancellation jumps to Done from any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    AwaitingSeverity,
    AwaitingAttachment,
    AwaitingDescription,
    Done,
}

impl ConversationState {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: ConversationState) -> bool {
        use ConversationState::*;
        matches!(
            (self, target),
            (AwaitingSeverity, AwaitingAttachment)
                | (AwaitingAttachment, AwaitingDescription)
                | (AwaitingDescription, Done)
                | (AwaitingSeverity, Done)
                | (AwaitingAttachment, Done)
        )
    }

    /// Whether the conversation is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::AwaitingSeverity
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingSeverity => "awaiting_severity",
            Self::AwaitingAttachment => "awaiting_attachment",
            Self::AwaitingDescription => "awaiting_description",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}
