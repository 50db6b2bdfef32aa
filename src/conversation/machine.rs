//! Transition rules of the intake conversation.
//!
//! `next_step` is the whole rule table: given the current state (or no
//! conversation) and an event, it names the step to take. Anything not
//! listed falls through to [`Step::Ignore`].

use crate::conversation::event::InboundEvent;
use crate::conversation::session::IncidentSession;
use crate::conversation::severity::Severity;
use crate::conversation::state::ConversationState;
use crate::error::SessionError;

/// What to do with an accepted (or ignored) event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Open a new conversation and ask for severity.
    Start,
    RecordSeverity(Severity),
    /// Persist the photo behind this file reference.
    StoreAttachment(String),
    SkipAttachment,
    /// Record the description and hand the report off for delivery.
    Deliver(String),
    Cancel,
    /// Event not valid here: no reply, no state change, no session change.
    Ignore,
}

/// Rule table. `state` is `None` when the sender has no open conversation.
pub fn next_step(state: Option<ConversationState>, event: &InboundEvent) -> Step {
    use ConversationState::*;
    use InboundEvent::*;

    match (state, event) {
        (None, EntryCommand) => Step::Start,
        (Some(s), CancelCommand) if !s.is_terminal() => Step::Cancel,
        (Some(AwaitingSeverity), SeverityChoice(severity)) => Step::RecordSeverity(*severity),
        (Some(AwaitingAttachment), PhotoAttachment(file_ref)) => {
            Step::StoreAttachment(file_ref.clone())
        }
        (Some(AwaitingAttachment), SkipCommand) => Step::SkipAttachment,
        (Some(AwaitingDescription), FreeText(text)) => Step::Deliver(text.clone()),
        // A bare label is still non-command text once severity is settled.
        (Some(AwaitingDescription), SeverityChoice(severity)) => {
            Step::Deliver(severity.label().to_string())
        }
        _ => Step::Ignore,
    }
}

/// One open conversation: where it is and what it has collected.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub state: ConversationState,
    pub session: IncidentSession,
}

impl Conversation {
    pub fn new(user_id: &str, display_name: &str) -> Self {
        Self {
            state: ConversationState::default(),
            session: IncidentSession::new(user_id, display_name),
        }
    }

    /// Move to `target`, refusing transitions the state graph does not allow.
    pub fn advance(&mut self, target: ConversationState) -> Result<(), SessionError> {
        self.advance_with(target, |_| Ok(()))
    }

    /// Apply `update` to the session and move to `target`, or do neither.
    ///
    /// The update runs against a copy, so a refused transition or a failed
    /// write leaves both the state and the collected fields as they were.
    pub fn advance_with<T, F>(
        &mut self,
        target: ConversationState,
        update: F,
    ) -> Result<T, SessionError>
    where
        F: FnOnce(&mut IncidentSession) -> Result<T, SessionError>,
    {
        if !self.state.can_transition_to(target) {
            tracing::warn!(from = %self.state, to = %target, "Rejected conversation transition");
            return Err(SessionError::InvalidTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }

        let mut next = self.session.clone();
        let value = update(&mut next)?;
        self.session = next;
        self.state = target;
        Ok(value)
    }
}
