//! Compiled regex patterns for content sanitization and XSS detection.
//!
//! Uses `std::sync::OnceLock` for lazy one-time initialization. The
//! dangerous-content set is stripped unconditionally by the sanitizer,
//! independent of the profile in use. The XSS set is only used for
//! classification and is broader.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Hosts trusted by default when validating URLs.
pub const TRUSTED_ORIGINS: &[&str] = &[
    "chat.openai.com",
    "chatgpt.com",
    "claude.ai",
    "gemini.google.com",
    "perplexity.ai",
    "grok.com",
    "x.com",
    "copilot.microsoft.com",
    "poe.com",
    "supabase.co",
];

/// Elements whose content is discarded rather than unwrapped.
pub const DROP_CONTENT_ELEMENTS: &[&str] = &[
    "script", "style", "iframe", "frame", "frameset", "object", "embed", "applet", "noscript",
    "template",
];

/// What a dangerous pattern is meant to neutralize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DangerKind {
    /// `<script>` elements, with or without their body.
    ScriptTag,
    /// `on*=` handler attributes inside a tag.
    EventHandler,
    /// `<iframe>`, `<object>`, `<embed>` and `<applet>` elements.
    EmbeddedContent,
    /// `javascript:`, `vbscript:` and `data:text/html` URL schemes.
    DangerousScheme,
}

impl fmt::Display for DangerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DangerKind::ScriptTag => write!(f, "script_tag"),
            DangerKind::EventHandler => write!(f, "event_handler"),
            DangerKind::EmbeddedContent => write!(f, "embedded_content"),
            DangerKind::DangerousScheme => write!(f, "dangerous_scheme"),
        }
    }
}

/// A compiled pattern together with its intent.
#[derive(Debug)]
pub struct DangerPattern {
    /// What the pattern targets.
    pub kind: DangerKind,
    /// The compiled regex.
    pub regex: Regex,
    /// Replacement text. Event handler patterns keep the enclosing tag
    /// prefix captured as `$1`.
    pub replacement: &'static str,
}

/// Patterns stripped from every input before structural filtering.
///
/// Order matters: element pairs are removed before their lone open/close
/// tags so that the body of a closed `<script>` never survives.
pub fn dangerous() -> &'static [DangerPattern] {
    static PATTERNS: OnceLock<Vec<DangerPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut specs: Vec<(DangerKind, String, &'static str)> = vec![
            (
                DangerKind::ScriptTag,
                r"(?is)<\s*script\b[^>]*>.*?<\s*/\s*script\s*>".into(),
                "",
            ),
            (DangerKind::ScriptTag, r"(?i)<\s*/?\s*script\b[^>]*>?".into(), ""),
        ];
        for element in ["iframe", "object", "embed", "applet"] {
            specs.push((
                DangerKind::EmbeddedContent,
                format!(r"(?is)<\s*{element}\b[^>]*>.*?<\s*/\s*{element}\s*>"),
                "",
            ));
        }
        specs.extend([
            (
                DangerKind::EmbeddedContent,
                r"(?i)<\s*/?\s*(?:iframe|object|embed|applet)\b[^>]*>?".to_string(),
                "",
            ),
            (
                DangerKind::EventHandler,
                r#"(?i)(<[^>]*?)[\s/]+on[a-z]+\s*=\s*(?:"[^"]*"?|'[^']*'?|[^\s>]*)"#.to_string(),
                "$1",
            ),
            (
                DangerKind::DangerousScheme,
                r"(?i)(?:javascript|vbscript)\s*:".to_string(),
                "",
            ),
            (
                DangerKind::DangerousScheme,
                r"(?i)data\s*:\s*text/html".to_string(),
                "",
            ),
        ]);

        specs
            .into_iter()
            .filter_map(|(kind, pattern, replacement)| match Regex::new(&pattern) {
                Ok(regex) => Some(DangerPattern {
                    kind,
                    regex,
                    replacement,
                }),
                Err(e) => {
                    tracing::warn!("Failed to compile dangerous pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect()
    })
}

/// Structural XSS constructs used by the detector.
///
/// Each entry is `(category, regex)`. Words like "script" or "JavaScript"
/// on their own never match; a construct must be present.
pub fn xss() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile_tagged(&[
            ("script_tag", r"(?i)<\s*/?\s*script\b"),
            ("dangerous_scheme", r"(?i)\b(?:javascript|vbscript)\s*:"),
            ("dangerous_scheme", r"(?i)\bdata\s*:\s*text/html"),
            ("event_handler", r#"(?i)<[^>]*[\s/"']on[a-z]+\s*="#),
            (
                "event_handler",
                r"(?i)\bon(?:load|error|click|dblclick|mouseover|mouseout|mouseenter|focus|blur|submit|change|input|keydown|keyup|keypress|animationstart|toggle|pointerdown)\s*=",
            ),
            ("dangerous_call", r"(?i)\beval\s*\("),
            ("dangerous_call", r"(?i)\bnew\s+Function\s*\("),
            ("dangerous_call", r#"(?i)\bset(?:Timeout|Interval)\s*\(\s*["'`]"#),
            ("dangerous_call", r"(?i)\bdocument\s*\.\s*(?:write|writeln|cookie)\b"),
            (
                "dangerous_call",
                r"(?i)\b(?:window|document|top|self)\s*\.\s*location\b(?:\s*\.\s*href)?\s*=[^=]",
            ),
            ("dom_injection", r"(?i)\.\s*(?:inner|outer)HTML\s*=[^=]"),
            ("dom_injection", r"(?i)\binsertAdjacentHTML\s*\("),
            (
                "media_handler",
                r"(?i)<\s*(?:img|svg|image|video|audio|body)\b[^>]*\bon(?:error|load)\s*=",
            ),
            ("embedded_content", r"(?i)<\s*(?:iframe|object|embed|applet)\b"),
        ])
    })
}

/// URL schemes that are never allowed through `sanitize_url`.
pub fn dangerous_url_scheme() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^\s*(?:javascript|vbscript|data)\s*:").unwrap())
}

/// Control characters, including tab and newline, removed from URLs.
///
/// Browsers ignore these inside a scheme, so `java\tscript:` would otherwise
/// slip past the scheme check.
pub fn url_control_characters() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\x00-\x1F\x7F\u{200B}-\u{200D}\u{FEFF}]").unwrap())
}

/// Handler-attribute syntax inside an attribute value. Such a value would
/// be rewritten by the handler pattern once serialized inside a tag.
pub fn inline_event_handler() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)(?:^|[\s/])on[a-z]+\s*=").unwrap())
}

/// Runs of whitespace, collapsed in search queries.
pub fn whitespace_run() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Format of an API token accepted for credentials.
pub fn api_key_format() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._\-]{20,512}$").unwrap())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn compile_tagged(patterns: &[(&'static str, &str)]) -> Vec<(&'static str, Regex)> {
    patterns
        .iter()
        .filter_map(|(tag, p)| match Regex::new(p) {
            Ok(r) => Some((*tag, r)),
            Err(e) => {
                tracing::warn!("Failed to compile security pattern '{}': {}", p, e);
                None
            }
        })
        .collect()
}
