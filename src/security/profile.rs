//! Sanitization profiles.
//!
//! Profiles are a closed set resolved at compile time. Parsing a profile
//! name that is not one of `strict`, `message` or `display` is an error
//! rather than a silent fallback.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::html::{Element, Node};
use super::patterns;
use crate::error::Error;

/// Attributes whose values are URLs.
const URL_ATTRIBUTES: &[&str] = &["href", "src", "action", "formaction", "xlink:href"];

/// Identifier of a sanitization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizationProfile {
    /// No markup at all; text is HTML-escaped.
    #[default]
    Strict,
    /// Minimal inline formatting for stored chat messages.
    Message,
    /// Slightly richer markup with whitelisted classes, for rendering.
    Display,
}

impl SanitizationProfile {
    /// Every profile, in increasing order of permissiveness.
    pub const ALL: [SanitizationProfile; 3] = [
        SanitizationProfile::Strict,
        SanitizationProfile::Message,
        SanitizationProfile::Display,
    ];

    /// Profile name as used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            SanitizationProfile::Strict => "strict",
            SanitizationProfile::Message => "message",
            SanitizationProfile::Display => "display",
        }
    }

    /// The policy backing this profile.
    pub fn policy(&self) -> &'static ProfilePolicy {
        static STRICT: OnceLock<ProfilePolicy> = OnceLock::new();
        static MESSAGE: OnceLock<ProfilePolicy> = OnceLock::new();
        static DISPLAY: OnceLock<ProfilePolicy> = OnceLock::new();
        match self {
            SanitizationProfile::Strict => STRICT.get_or_init(|| ProfilePolicy {
                allowed_tags: HashSet::new(),
                allowed_attributes: HashSet::new(),
                allowed_classes: HashSet::new(),
                keep_content: true,
            }),
            SanitizationProfile::Message => MESSAGE.get_or_init(|| ProfilePolicy {
                allowed_tags: MESSAGE_TAGS.iter().copied().collect(),
                allowed_attributes: HashSet::new(),
                allowed_classes: HashSet::new(),
                keep_content: true,
            }),
            SanitizationProfile::Display => DISPLAY.get_or_init(|| ProfilePolicy {
                allowed_tags: MESSAGE_TAGS
                    .iter()
                    .chain(DISPLAY_EXTRA_TAGS)
                    .copied()
                    .collect(),
                allowed_attributes: ["href", "title", "class"].into_iter().collect(),
                allowed_classes: DISPLAY_CLASSES.iter().copied().collect(),
                keep_content: true,
            }),
        }
    }
}

const MESSAGE_TAGS: &[&str] = &[
    "b", "strong", "i", "em", "u", "s", "code", "pre", "br", "p",
];

const DISPLAY_EXTRA_TAGS: &[&str] = &[
    "a", "span", "div", "ul", "ol", "li", "blockquote", "h1", "h2", "h3", "h4",
];

const DISPLAY_CLASSES: &[&str] = &[
    "code-block",
    "highlight",
    "memory-snippet",
    "message-user",
    "message-assistant",
    "timestamp",
];

impl fmt::Display for SanitizationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SanitizationProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SanitizationProfile::Strict),
            "message" => Ok(SanitizationProfile::Message),
            "display" => Ok(SanitizationProfile::Display),
            other => Err(Error::UnknownProfile(other.to_string())),
        }
    }
}

/// Allow-lists for one profile. Immutable once built.
#[derive(Debug, Clone)]
pub struct ProfilePolicy {
    /// Tags kept in the output.
    pub allowed_tags: HashSet<&'static str>,
    /// Attributes kept on allowed tags.
    pub allowed_attributes: HashSet<&'static str>,
    /// Class tokens kept in `class` attributes.
    pub allowed_classes: HashSet<&'static str>,
    /// Unwrap the children of disallowed tags instead of dropping them.
    pub keep_content: bool,
}

impl ProfilePolicy {
    /// Whether any markup survives this policy.
    pub fn allows_markup(&self) -> bool {
        !self.allowed_tags.is_empty()
    }

    /// Filter a node list against the allow-lists.
    ///
    /// Disallowed elements are unwrapped so their text survives, except for
    /// elements in [`patterns::DROP_CONTENT_ELEMENTS`] whose body is never
    /// human-readable.
    ///
    /// Recursion follows the tree, whose depth the parser caps at
    /// [`html::MAX_NESTING_DEPTH`](super::html::MAX_NESTING_DEPTH).
    pub fn filter(&self, nodes: Vec<Node>) -> Vec<Node> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::Text(text) => out.push(Node::Text(text)),
                Node::Element(element) => {
                    if patterns::DROP_CONTENT_ELEMENTS.contains(&element.tag.as_str()) {
                        continue;
                    }
                    let children = self.filter(element.children);
                    if self.allowed_tags.contains(element.tag.as_str()) {
                        out.push(Node::Element(Element {
                            attrs: self.filter_attributes(element.attrs),
                            tag: element.tag,
                            children,
                        }));
                    } else if self.keep_content {
                        out.extend(children);
                    }
                }
            }
        }
        out
    }

    fn filter_attributes(&self, attrs: Vec<(String, String)>) -> Vec<(String, String)> {
        attrs
            .into_iter()
            .filter_map(|(name, value)| {
                if name.starts_with("on") || !self.allowed_attributes.contains(name.as_str()) {
                    return None;
                }
                if patterns::inline_event_handler().is_match(&value)
                    || patterns::dangerous()
                        .iter()
                        .any(|pattern| pattern.regex.is_match(&value))
                {
                    return None;
                }
                if URL_ATTRIBUTES.contains(&name.as_str()) {
                    let cleaned = patterns::url_control_characters().replace_all(&value, "");
                    if patterns::dangerous_url_scheme().is_match(&cleaned) {
                        return None;
                    }
                }
                if name == "class" {
                    let kept: Vec<&str> = value
                        .split_whitespace()
                        .filter(|class| self.allowed_classes.contains(class))
                        .collect();
                    if kept.is_empty() {
                        return None;
                    }
                    return Some((name, kept.join(" ")));
                }
                Some((name, value))
            })
            .collect()
    }
}
