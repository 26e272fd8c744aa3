//! Heuristic XSS classifier for captured content.

use super::detectors::{truncate, Detector, Finding, Severity};
use super::patterns;

/// Flags structurally dangerous constructs.
///
/// The pattern list is a floor rather than a complete defense: novel
/// encodings can slip through, and prose quoting attack syntax is flagged.
#[derive(Debug, Default, Clone, Copy)]
pub struct XssDetector;

impl XssDetector {
    /// Create a new detector.
    pub fn new() -> Self {
        Self
    }
}

fn severity_for(category: &str) -> Severity {
    match category {
        "script_tag" | "media_handler" | "dangerous_scheme" => Severity::Critical,
        "event_handler" | "embedded_content" | "dom_injection" => Severity::High,
        _ => Severity::Medium,
    }
}

impl Detector for XssDetector {
    fn name(&self) -> &str {
        "xss"
    }

    fn detect(&self, content: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (category, regex) in patterns::xss() {
            for m in regex.find_iter(content) {
                findings.push(Finding {
                    detector: "xss".into(),
                    category: (*category).into(),
                    matched_content: truncate(m.as_str(), 200),
                    severity: severity_for(category),
                    offset: m.start(),
                    length: m.len(),
                });
            }
        }
        findings.sort_by_key(|f| f.offset);
        findings
    }

    fn is_flagged(&self, content: &str) -> bool {
        patterns::xss().iter().any(|(_, regex)| regex.is_match(content))
    }
}
