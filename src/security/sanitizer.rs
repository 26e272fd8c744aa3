//! Sanitization engine for captured chat content.
//!
//! Every entry point strips the dangerous patterns first, regardless of
//! profile, and only then applies the profile's structural allow-list. A
//! profile that allows too much can therefore never reintroduce a script
//! element, handler attribute, embedded object or script URL. Sanitizers
//! never fail: absent or malformed input degrades to an empty value.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use super::detectors::Detector;
use super::events::{SecurityEventKind, SecurityEventLog};
use super::html;
use super::patterns;
use super::profile::SanitizationProfile;
use super::xss::XssDetector;
use crate::config::SanitizerConfig;
use crate::error::Result;

/// A message as captured from a page, before sanitization.
///
/// Every field is optional; non-string JSON values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    /// Author role, e.g. `user` or `assistant`.
    pub role: Option<String>,
    /// Message body, possibly HTML.
    pub content: Option<String>,
    /// Capture time, ideally ISO-8601.
    pub timestamp: Option<String>,
    /// Page URL the message was captured from.
    pub url: Option<String>,
    /// Site name.
    pub site: Option<String>,
    /// Conversation identifier on the site.
    pub conversation_id: Option<String>,
}

impl RawMessage {
    /// Build a message from loosely-typed JSON. Returns `None` for anything
    /// other than an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let field = |name: &str| object.get(name).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            role: field("role"),
            content: field("content"),
            timestamp: field("timestamp"),
            url: field("url"),
            site: field("site"),
            conversation_id: field("conversationId"),
        })
    }
}

/// A message safe to persist, display or send to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedMessage {
    /// Sanitized role.
    pub role: String,
    /// Content sanitized for storage.
    pub content: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Sanitized URL or the safe placeholder.
    pub url: String,
    /// Sanitized site name.
    pub site: String,
    /// Conversation identifier restricted to `[A-Za-z0-9_-]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Outcome of URL validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlVerdict {
    /// Nothing left after cleaning.
    Empty,
    /// Host is on the trusted-origin list.
    Trusted,
    /// Not dangerous but outside the trusted origins; allowed and logged.
    Untrusted,
    /// Dangerous scheme; replaced with the placeholder.
    Blocked,
}

/// Result of [`Sanitizer::classify_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlCheck {
    /// The URL to use: cleaned input, or the placeholder when blocked.
    pub url: String,
    /// Why.
    pub verdict: UrlVerdict,
}

/// Multi-profile content sanitizer.
pub struct Sanitizer {
    config: SanitizerConfig,
    detector: XssDetector,
    events: Option<Arc<SecurityEventLog>>,
}

impl Sanitizer {
    /// Create a sanitizer with default configuration.
    pub fn new() -> Self {
        Self::with_config(SanitizerConfig::default())
    }

    /// Create a sanitizer with custom configuration.
    pub fn with_config(config: SanitizerConfig) -> Self {
        Self {
            config,
            detector: XssDetector::new(),
            events: None,
        }
    }

    /// Record blocked URLs and detected XSS in `log`.
    pub fn with_event_log(mut self, log: Arc<SecurityEventLog>) -> Self {
        self.events = Some(log);
        self
    }

    /// Get the current configuration.
    pub fn config(&self) -> &SanitizerConfig {
        &self.config
    }

    /// Sanitize `input` with `profile`.
    ///
    /// `strict` removes all markup and HTML-escapes what is left. The other
    /// profiles keep allow-listed tags, attributes and classes and unwrap
    /// everything else so the readable text survives.
    pub fn sanitize(&self, input: &str, profile: SanitizationProfile) -> String {
        if input.is_empty() {
            return String::new();
        }

        let stripped = strip_dangerous(input);
        let policy = profile.policy();
        let nodes = policy.filter(html::parse_fragment(&stripped));

        let rendered = if policy.allows_markup() {
            html::serialize(&nodes)
        } else {
            html::escape_html(&html::text_content(&nodes))
        };

        // Entity decoding can surface a scheme that was hidden in the input.
        strip_dangerous(&rendered)
    }

    /// Sanitize optional input; `None` yields an empty string.
    pub fn sanitize_opt(&self, input: Option<&str>, profile: SanitizationProfile) -> String {
        input
            .map(|s| self.sanitize(s, profile))
            .unwrap_or_default()
    }

    /// Whether `content` contains a structurally dangerous construct.
    pub fn detect_xss(&self, content: &str) -> bool {
        self.detector.is_flagged(content)
    }

    /// Validate and classify a URL.
    pub fn classify_url(&self, url: &str) -> UrlCheck {
        let cleaned = patterns::url_control_characters()
            .replace_all(url, "")
            .trim()
            .to_string();

        if cleaned.is_empty() {
            return UrlCheck {
                url: cleaned,
                verdict: UrlVerdict::Empty,
            };
        }

        if patterns::dangerous_url_scheme().is_match(&cleaned) {
            self.report(
                SecurityEventKind::UrlBlocked,
                json!({ "url": super::detectors::truncate(&cleaned, 100) }),
            );
            return UrlCheck {
                url: self.config.safe_url_placeholder.clone(),
                verdict: UrlVerdict::Blocked,
            };
        }

        let parsed = Url::parse(&cleaned)
            .ok()
            .filter(|parsed| matches!(parsed.scheme(), "http" | "https"));
        let host = parsed
            .as_ref()
            .and_then(|parsed| parsed.host_str())
            .map(str::to_ascii_lowercase);

        let trusted = host.as_deref().is_some_and(|host| {
            self.config.trusted_origins.iter().any(|origin| {
                let origin = origin.to_ascii_lowercase();
                host == origin || host.ends_with(&format!(".{origin}"))
            })
        });

        let url = neutralize_url(&cleaned, parsed.as_ref());
        if trusted {
            UrlCheck {
                url,
                verdict: UrlVerdict::Trusted,
            }
        } else {
            tracing::info!(
                target: "chatvault::security",
                host = host.as_deref().unwrap_or("<unparsed>"),
                "URL outside trusted origins"
            );
            UrlCheck {
                url,
                verdict: UrlVerdict::Untrusted,
            }
        }
    }

    /// Sanitize a URL: dangerous schemes become the safe placeholder.
    ///
    /// Other URLs keep their text unless it carries markup characters. Those
    /// are percent-encoded for http(s) URLs and HTML-escaped otherwise.
    pub fn sanitize_url(&self, url: &str) -> String {
        self.classify_url(url).url
    }

    /// Strict sanitization plus the storage length limit.
    ///
    /// Output never exceeds `max_storage_length` characters plus the
    /// truncation marker.
    pub fn sanitize_for_storage(&self, content: &str) -> String {
        let sanitized = self.sanitize(content, SanitizationProfile::Strict);
        let limit = self.config.max_storage_length;

        let cut = match sanitized.char_indices().nth(limit) {
            Some((idx, _)) => idx,
            None => return sanitized,
        };

        let mut head = &sanitized[..cut];
        // Don't leave half of an entity behind.
        if let Some(amp) = head.rfind('&') {
            if !head[amp..].contains(';') && head.len() - amp < 8 {
                head = &head[..amp];
            }
        }

        tracing::debug!(limit, "Truncated content for storage");
        format!("{}{}", head, self.config.truncation_marker)
    }

    /// Sanitize with the `display` profile, recording an event when the raw
    /// content looked like an XSS attempt.
    pub fn sanitize_for_display(&self, content: &str) -> String {
        let findings = self.detector.detect(content);
        if let Some(first) = findings.first() {
            self.report(
                SecurityEventKind::XssDetected,
                json!({
                    "category": first.category,
                    "matched": first.matched_content,
                    "findings": findings.len(),
                }),
            );
        }
        self.sanitize(content, SanitizationProfile::Display)
    }

    /// Sanitize a search query bound for the remote API.
    pub fn sanitize_query(&self, query: &str) -> String {
        let strict = self.sanitize(query, SanitizationProfile::Strict);
        let collapsed = patterns::whitespace_run().replace_all(strict.trim(), " ");
        match collapsed.char_indices().nth(self.config.max_query_length) {
            Some((idx, _)) => collapsed[..idx].trim_end().to_string(),
            None => collapsed.into_owned(),
        }
    }

    /// Restrict an identifier to ASCII alphanumerics, `-` and `_`.
    pub fn sanitize_conversation_id(&self, id: &str) -> String {
        sanitize_conversation_id(id)
    }

    /// Sanitize every field of a captured message.
    ///
    /// A missing message yields empty fields. The timestamp is normalized to
    /// ISO-8601; when absent or unparseable the current time is used.
    pub fn sanitize_message(&self, message: Option<&RawMessage>) -> SanitizedMessage {
        let Some(message) = message else {
            return SanitizedMessage {
                role: String::new(),
                content: String::new(),
                timestamp: normalize_timestamp(None),
                url: String::new(),
                site: String::new(),
                conversation_id: None,
            };
        };

        if message.content.as_deref().is_some_and(|c| self.detect_xss(c)) {
            self.report(
                SecurityEventKind::XssDetected,
                json!({ "field": "content" }),
            );
        }

        SanitizedMessage {
            role: self.sanitize_opt(message.role.as_deref(), SanitizationProfile::Strict),
            content: message
                .content
                .as_deref()
                .map(|c| self.sanitize_for_storage(c))
                .unwrap_or_default(),
            timestamp: normalize_timestamp(message.timestamp.as_deref()),
            url: message
                .url
                .as_deref()
                .map(|u| self.sanitize_url(u))
                .unwrap_or_default(),
            site: self.sanitize_opt(message.site.as_deref(), SanitizationProfile::Strict),
            conversation_id: message
                .conversation_id
                .as_deref()
                .map(sanitize_conversation_id),
        }
    }

    /// Sanitize a sequence of messages.
    pub fn sanitize_batch(&self, messages: &[RawMessage]) -> Vec<SanitizedMessage> {
        messages
            .iter()
            .map(|m| self.sanitize_message(Some(m)))
            .collect()
    }

    /// Sanitize loosely-typed JSON. Anything other than an array yields an
    /// empty list; non-object elements yield empty messages.
    pub fn sanitize_batch_value(&self, messages: &Value) -> Vec<SanitizedMessage> {
        match messages.as_array() {
            Some(items) => items
                .iter()
                .map(|item| self.sanitize_message(RawMessage::from_value(item).as_ref()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Record a security event and persist the event ring.
    pub async fn log_security_event(
        &self,
        kind: impl Into<SecurityEventKind>,
        details: Value,
    ) -> Result<()> {
        match &self.events {
            Some(log) => log.log_security_event(kind, details).await.map(|_| ()),
            None => {
                let kind = kind.into();
                tracing::warn!(target: "chatvault::security", kind = %kind, details = %details, "Security event");
                Ok(())
            }
        }
    }

    fn report(&self, kind: SecurityEventKind, details: Value) {
        match &self.events {
            Some(log) => log.log_in_background(kind, details),
            None => {
                tracing::warn!(target: "chatvault::security", kind = %kind, details = %details, "Security event")
            }
        }
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip every dangerous pattern until none is left.
///
/// Runs to a fixed point so that nesting such as `<scr<script></script>ipt>`
/// cannot reassemble a pattern. Every replacement shrinks the input, so the
/// loop terminates.
pub fn strip_dangerous(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let mut changed = false;
        for pattern in patterns::dangerous() {
            if pattern.regex.is_match(&current) {
                current = pattern
                    .regex
                    .replace_all(&current, pattern.replacement)
                    .into_owned();
                changed = true;
            }
        }
        if !changed {
            return current;
        }
    }
}

/// Keep markup characters out of a URL that is otherwise allowed through.
fn neutralize_url(cleaned: &str, parsed: Option<&Url>) -> String {
    let has_markup = cleaned
        .chars()
        .any(|c| matches!(c, '<' | '>' | '"' | '\'' | '`') || c.is_whitespace());
    if !has_markup {
        return strip_dangerous(cleaned);
    }
    match parsed {
        // The serializer percent-encodes `<`, `>`, `"`, backticks and spaces.
        Some(parsed) => strip_dangerous(&parsed.as_str().replace('\'', "%27")),
        None => html::escape_html(&strip_dangerous(cleaned)),
    }
}

/// Restrict an identifier to ASCII alphanumerics, `-` and `_`. Other
/// characters are dropped, not escaped.
pub fn sanitize_conversation_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

fn normalize_timestamp(raw: Option<&str>) -> String {
    let parsed = raw.and_then(|s| {
        let s = s.trim();
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                s.parse::<i64>()
                    .ok()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
            })
    });
    parsed
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
