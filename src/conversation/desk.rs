//! Incident desk: hosts every open conversation and drives its transitions.
//!
//! The desk owns the map from session id to [`Conversation`]. Each entry sits
//! behind its own async mutex, so a slow photo download or SMTP session only
//! holds up the conversation it belongs to.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::attachments::AttachmentStore;
use crate::channels::{IncomingMessage, OutgoingResponse};
use crate::conversation::event::InboundEvent;
use crate::conversation::machine::{Conversation, Step, next_step};
use crate::conversation::prompts;
use crate::conversation::session::{AttachmentRef, IncidentSession};
use crate::conversation::state::ConversationState;
use crate::mail::{MailDispatcher, OutgoingMail};

/// Who an event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub session_id: String,
    pub user_id: String,
    pub display_name: String,
}

impl Participant {
    pub fn new(session_id: &str, user_id: &str, display_name: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

impl From<&IncomingMessage> for Participant {
    fn from(msg: &IncomingMessage) -> Self {
        Self::new(&msg.session_key(), &msg.user_id, msg.display_name())
    }
}

/// Outcome of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Replies to send, in order. Empty when the event was ignored.
    pub replies: Vec<OutgoingResponse>,
    /// State after the event; `None` if the sender has no conversation.
    pub state: Option<ConversationState>,
}

impl Turn {
    fn ignored(state: Option<ConversationState>) -> Self {
        Self {
            replies: Vec::new(),
            state,
        }
    }

    fn reply(response: OutgoingResponse, state: ConversationState) -> Self {
        Self {
            replies: vec![response],
            state: Some(state),
        }
    }
}

/// Hosts the incident conversations and their collaborators.
pub struct IncidentDesk {
    conversations: RwLock<HashMap<String, Arc<Mutex<Conversation>>>>,
    attachments: Arc<dyn AttachmentStore>,
    mailer: Arc<dyn MailDispatcher>,
}

impl IncidentDesk {
    pub fn new(attachments: Arc<dyn AttachmentStore>, mailer: Arc<dyn MailDispatcher>) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            attachments,
            mailer,
        }
    }

    /// Handle one event for `who`. Callers must not interleave events of
    /// the same session; events of different sessions may run concurrently.
    pub async fn handle(&self, who: &Participant, event: InboundEvent) -> Turn {
        let existing = self
            .conversations
            .read()
            .await
            .get(&who.session_id)
            .cloned();

        let Some(entry) = existing else {
            return self.handle_without_conversation(who, &event).await;
        };

        let mut conversation = entry.lock().await;
        let step = next_step(Some(conversation.state), &event);
        let turn = self.apply(who, &mut conversation, step, &event).await;

        if conversation.state.is_terminal() {
            drop(conversation);
            self.conversations.write().await.remove(&who.session_id);
            tracing::debug!(session = %who.session_id, "Conversation closed");
        }

        turn
    }

    /// Current state of a session, if it has an open conversation.
    pub async fn state_of(&self, session_id: &str) -> Option<ConversationState> {
        let entry = self.conversations.read().await.get(session_id).cloned()?;
        let state = entry.lock().await.state;
        Some(state)
    }

    /// Copy of the data collected so far for a session.
    pub async fn session_of(&self, session_id: &str) -> Option<IncidentSession> {
        let entry = self.conversations.read().await.get(session_id).cloned()?;
        let session = entry.lock().await.session.clone();
        Some(session)
    }

    /// Number of open conversations.
    pub async fn open_conversations(&self) -> usize {
        self.conversations.read().await.len()
    }

    async fn handle_without_conversation(&self, who: &Participant, event: &InboundEvent) -> Turn {
        if next_step(None, event) != Step::Start {
            tracing::debug!(
                session = %who.session_id,
                event = event.kind(),
                "Ignoring event with no open conversation"
            );
            return Turn::ignored(None);
        }

        let conversation = Conversation::new(&who.user_id, &who.display_name);
        let state = conversation.state;
        self.conversations
            .write()
            .await
            .entry(who.session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(conversation)));

        tracing::info!(
            session = %who.session_id,
            user = %who.display_name,
            "Incident conversation started"
        );
        Turn::reply(prompts::severity_prompt(), state)
    }

    async fn apply(
        &self,
        who: &Participant,
        conversation: &mut Conversation,
        step: Step,
        event: &InboundEvent,
    ) -> Turn {
        let current = conversation.state;

        match step {
            Step::Ignore | Step::Start => {
                tracing::debug!(
                    session = %who.session_id,
                    state = %current,
                    event = event.kind(),
                    "Ignoring event not valid in this state"
                );
                Turn::ignored(Some(current))
            }

            Step::RecordSeverity(severity) => {
                if let Err(e) = conversation.advance_with(ConversationState::AwaitingAttachment, |s| {
                    s.set_severity(severity)
                }) {
                    return self.rejected(who, current, e);
                }
                tracing::info!(
                    session = %who.session_id,
                    user = %who.display_name,
                    %severity,
                    "Severity recorded"
                );
                Turn::reply(prompts::attachment_prompt(), conversation.state)
            }

            Step::StoreAttachment(file_ref) => {
                let at = Utc::now();
                let path = match self
                    .attachments
                    .store(&file_ref, &who.display_name, at)
                    .await
                {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::error!(
                            session = %who.session_id,
                            user = %who.display_name,
                            file_ref = %file_ref,
                            at = %at.to_rfc3339(),
                            error = %e,
                            "Attachment fetch failed; conversation stays on the screenshot step"
                        );
                        return Turn::ignored(Some(current));
                    }
                };

                tracing::info!(
                    session = %who.session_id,
                    user = %who.display_name,
                    path = %path.display(),
                    "Screenshot received"
                );
                if let Err(e) = conversation.advance_with(ConversationState::AwaitingDescription, |s| {
                    s.set_attachment(AttachmentRef::Stored(path))
                }) {
                    return self.rejected(who, current, e);
                }
                Turn::reply(prompts::description_prompt(), conversation.state)
            }

            Step::SkipAttachment => {
                if let Err(e) = conversation.advance_with(ConversationState::AwaitingDescription, |s| {
                    s.set_attachment(AttachmentRef::Skipped)
                }) {
                    return self.rejected(who, current, e);
                }
                tracing::info!(
                    session = %who.session_id,
                    user = %who.display_name,
                    "Screenshot skipped"
                );
                Turn::reply(prompts::description_prompt_no_attachment(), conversation.state)
            }

            Step::Deliver(description) => {
                let report = match conversation.advance_with(ConversationState::Done, |s| {
                    s.set_description(&description)?;
                    s.report()
                }) {
                    Ok(report) => report,
                    Err(e) => return self.rejected(who, current, e),
                };
                let elapsed = Utc::now() - conversation.session.started_at;
                tracing::info!(
                    session = %who.session_id,
                    user = %who.display_name,
                    description = %description,
                    elapsed_secs = elapsed.num_seconds(),
                    "Description received"
                );

                let mail = OutgoingMail::from_report(&report);
                if let Err(e) = self.mailer.send(&mail).await {
                    // The user has already been told we will get in touch.
                    tracing::error!(
                        session = %who.session_id,
                        user = %who.display_name,
                        severity = %report.severity,
                        subject = %mail.subject,
                        at = %Utc::now().to_rfc3339(),
                        error = %e,
                        "Incident email delivery failed; report needs manual follow-up"
                    );
                }
                Turn::reply(prompts::acknowledgement(), conversation.state)
            }

            Step::Cancel => {
                if let Err(e) = conversation.advance(ConversationState::Done) {
                    return self.rejected(who, current, e);
                }
                tracing::info!(
                    session = %who.session_id,
                    user = %who.display_name,
                    from = %current,
                    "Conversation cancelled"
                );
                Turn::reply(prompts::farewell(), conversation.state)
            }
        }
    }

    /// A session write or transition the rule table should never have produced.
    fn rejected(
        &self,
        who: &Participant,
        state: ConversationState,
        error: crate::error::SessionError,
    ) -> Turn {
        tracing::warn!(
            session = %who.session_id,
            state = %state,
            error = %error,
            "Session update rejected"
        );
        Turn::ignored(Some(state))
    }
}
