//! Incident intake conversation: events, states, collected data and the desk
//! that ties them to the attachment store and mail dispatcher.

pub mod desk;
pub mod event;
pub mod machine;
pub mod prompts;
pub mod session;
pub mod severity;
pub mod state;

pub use desk::{IncidentDesk, Participant, Turn};
pub use event::InboundEvent;
pub use machine::{Conversation, Step, next_step};
pub use session::{AttachmentRef, IncidentReport, IncidentSession};
pub use severity::Severity;
pub use state::ConversationState;
