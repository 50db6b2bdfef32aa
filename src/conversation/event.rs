//! Inbound events: classification of raw messages for the state machine.

use crate::channels::IncomingMessage;
use crate::conversation::severity::Severity;

/// Start a report.
pub const ENTRY_COMMAND: &str = "empezar";
/// Abort the report, valid at any step.
pub const CANCEL_COMMAND: &str = "cancelar";
/// Skip the screenshot step.
pub const SKIP_COMMAND: &str = "saltar";

/// A classified inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    EntryCommand,
    CancelCommand,
    SkipCommand,
    /// Some other slash command; never accepted as free text.
    OtherCommand(String),
    /// Text that is exactly one of the canonical severity labels.
    SeverityChoice(Severity),
    /// A photo, by transport file reference.
    PhotoAttachment(String),
    FreeText(String),
}

impl InboundEvent {
    /// Classify an inbound message. Photos win over their caption.
    pub fn from_message(msg: &IncomingMessage) -> Self {
        match msg.photo.as_deref() {
            Some(file_ref) => Self::PhotoAttachment(file_ref.to_string()),
            None => Self::parse(&msg.content),
        }
    }

    /// Classify message text.
    pub fn parse(content: &str) -> Self {
        if let Some(command) = parse_command(content) {
            return match command.as_str() {
                ENTRY_COMMAND => Self::EntryCommand,
                CANCEL_COMMAND => Self::CancelCommand,
                SKIP_COMMAND => Self::SkipCommand,
                _ => Self::OtherCommand(command),
            };
        }

        match Severity::from_label(content) {
            Some(severity) => Self::SeverityChoice(severity),
            None => Self::FreeText(content.to_string()),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntryCommand => "entry_command",
            Self::CancelCommand => "cancel_command",
            Self::SkipCommand => "skip_command",
            Self::OtherCommand(_) => "other_command",
            Self::SeverityChoice(_) => "severity_choice",
            Self::PhotoAttachment(_) => "photo",
            Self::FreeText(_) => "free_text",
        }
    }
}

/// `/name@bot args` → `name` (lower-cased). `None` if not a command.
fn parse_command(content: &str) -> Option<String> {
    let token = content.split_whitespace().next()?;
    let name = token.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    Some(name.to_lowercase())
}
