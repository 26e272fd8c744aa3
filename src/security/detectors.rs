//! Trait-based detector system for security screening.
//!
//! Defines the core [`Detector`] trait and the finding types shared by
//! content classifiers.

use std::fmt;

/// Severity levels for security findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Low severity, minor concern.
    Low,
    /// Medium severity, should be reviewed.
    Medium,
    /// High severity, likely script execution.
    High,
    /// Critical severity, direct script execution.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A single security finding from a detector.
#[derive(Debug, Clone)]
pub struct Finding {
    /// Which detector produced this finding.
    pub detector: String,
    /// Category of the finding.
    pub category: String,
    /// The matched content (may be truncated).
    pub matched_content: String,
    /// Severity level.
    pub severity: Severity,
    /// Byte offset in the original content where the match starts.
    pub offset: usize,
    /// Length of the match in bytes.
    pub length: usize,
}

/// Trait for all security detectors.
pub trait Detector: Send + Sync {
    /// Name of this detector.
    fn name(&self) -> &str;

    /// Detect issues in the given content.
    fn detect(&self, content: &str) -> Vec<Finding>;

    /// Whether the content triggers at least one finding.
    fn is_flagged(&self, content: &str) -> bool {
        !self.detect(content).is_empty()
    }
}

/// Truncate matched content for reporting, respecting char boundaries.
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
