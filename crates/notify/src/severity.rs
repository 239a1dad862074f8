//! Alert severity levels and their chat presentation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Color used for messages whose alert has been resolved.
pub const RESOLVED_COLOR: u32 = 0x0028_a745;

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Critical - immediate action required
    Critical,
    /// Warning - something needs attention
    Warning,
    /// Informational
    Info,
    /// Missing or unrecognised severity label
    #[serde(other)]
    Unknown,
}

impl Severity {
    /// Parse a `severity` label value. Unrecognised values map to [`Severity::Unknown`].
    #[must_use]
    pub fn from_label(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" | "page" => Self::Critical,
            "warning" | "warn" => Self::Warning,
            "info" | "informational" => Self::Info,
            _ => Self::Unknown,
        }
    }

    /// Attachment strip color for this severity.
    #[must_use]
    pub const fn color(&self) -> u32 {
        match self {
            Self::Critical => 0x00d7_3502, // Red
            Self::Warning => 0x00ff_8c00,  // Orange
            Self::Info => 0x0000_99ff,     // Blue
            Self::Unknown => 0x006c_757d,  // Grey
        }
    }

    /// Emoji shown in message headers.
    #[must_use]
    pub const fn emoji(&self) -> &'static str {
        match self {
            Self::Critical => "🔴",
            Self::Warning => "🟡",
            Self::Info => "🔵",
            Self::Unknown => "⚪",
        }
    }

    /// Header prefix, e.g. `CRITICAL ALERT`.
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL ALERT",
            Self::Warning => "WARNING ALERT",
            Self::Info => "INFORMATIONAL",
            Self::Unknown => "UNKNOWN SEVERITY",
        }
    }

    /// Lowercase label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
