//! Incident severity: the five fixed urgency labels offered to the user.

use serde::{Deserialize, Serialize};

/// How urgent and important the incident is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Other,
}

impl Severity {
    /// All severities, in the order they are offered.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Other,
    ];

    /// The label shown on the choice keyboard. Clients match on these exactly.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "Crítica",
            Self::High => "Alta",
            Self::Medium => "Media",
            Self::Low => "Baja",
            Self::Other => "Otro",
        }
    }

    /// Exact, case- and accent-sensitive match against the canonical labels.
    pub fn from_label(text: &str) -> Option<Severity> {
        Self::ALL.into_iter().find(|s| s.label() == text)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Other => "Other",
        };
        write!(f, "{s}")
    }
}
