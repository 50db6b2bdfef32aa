//! Incident session: the fields collected so far in one conversation.
//!
//! Each field is written once, in order: severity, then attachment, then
//! description. The setters enforce both rules.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::conversation::severity::Severity;
use crate::error::SessionError;

/// Screenshot supplied for the incident, or an explicit skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentRef {
    Stored(PathBuf),
    Skipped,
}

impl AttachmentRef {
    /// Local path, unless the step was skipped.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Stored(path) => Some(path),
            Self::Skipped => None,
        }
    }
}

/// Accumulated data for one in-flight incident report.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentSession {
    pub user_id: String,
    pub display_name: String,
    pub started_at: DateTime<Utc>,
    severity: Option<Severity>,
    attachment: Option<AttachmentRef>,
    description: Option<String>,
}

/// A finished report, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentReport {
    pub display_name: String,
    pub severity: Severity,
    pub attachment: AttachmentRef,
    pub description: String,
}

impl IncidentSession {
    pub fn new(user_id: &str, display_name: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            started_at: Utc::now(),
            severity: None,
            attachment: None,
            description: None,
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        self.severity
    }

    pub fn attachment(&self) -> Option<&AttachmentRef> {
        self.attachment.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_severity(&mut self, severity: Severity) -> Result<(), SessionError> {
        if self.severity.is_some() {
            return Err(SessionError::AlreadySet { field: "severity" });
        }
        self.severity = Some(severity);
        Ok(())
    }

    pub fn set_attachment(&mut self, attachment: AttachmentRef) -> Result<(), SessionError> {
        if self.severity.is_none() {
            return Err(SessionError::OutOfOrder {
                field: "severity",
                next: "attachment",
            });
        }
        if self.attachment.is_some() {
            return Err(SessionError::AlreadySet { field: "attachment" });
        }
        self.attachment = Some(attachment);
        Ok(())
    }

    pub fn set_description(&mut self, description: &str) -> Result<(), SessionError> {
        if self.attachment.is_none() {
            return Err(SessionError::OutOfOrder {
                field: "attachment",
                next: "description",
            });
        }
        if self.description.is_some() {
            return Err(SessionError::AlreadySet {
                field: "description",
            });
        }
        self.description = Some(description.to_string());
        Ok(())
    }

    /// Build the deliverable report. Fails unless every field is set.
    pub fn report(&self) -> Result<IncidentReport, SessionError> {
        Ok(IncidentReport {
            display_name: self.display_name.clone(),
            severity: self
                .severity
                .ok_or(SessionError::Incomplete { field: "severity" })?,
            attachment: self
                .attachment
                .clone()
                .ok_or(SessionError::Incomplete { field: "attachment" })?,
            description: self
                .description
                .clone()
                .ok_or(SessionError::Incomplete {
                    field: "description",
                })?,
        })
    }
}
