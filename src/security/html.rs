//! HTML fragment model used by the sanitizer.
//!
//! Content is parsed with `scraper` (html5ever underneath) and converted
//! into a generic [`Node`] tree (tag name, attributes, children) that is
//! independent of any browser DOM. The sanitizer filters that tree against
//! an allow-list, then serializes it back to text.
//!
//! Conversion walks the parsed document with an explicit stack and never
//! builds a tree deeper than [`MAX_NESTING_DEPTH`]. Elements nested past
//! the cap are unwrapped into their nearest kept ancestor, so every later
//! walk over the tree has bounded recursion.

use scraper::Html;

use super::patterns::DROP_CONTENT_ELEMENTS;

/// Deepest element nesting kept after parsing.
pub const MAX_NESTING_DEPTH: usize = 128;

/// A parsed fragment node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// An element with its attributes and children.
    Element(Element),
    /// Decoded text.
    Text(String),
}

/// A parsed element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Lowercase tag name.
    pub tag: String,
    /// Attributes in source order, names lowercased, values decoded.
    pub attrs: Vec<(String, String)>,
    /// Child nodes.
    pub children: Vec<Node>,
}

/// Elements that never have children or a closing tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose first newline is swallowed by the parser.
const LEADING_NEWLINE_ELEMENTS: &[&str] = &["pre", "textarea", "listing"];

fn is_valid_attribute_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
}

fn convert_element(element: &scraper::node::Element) -> Element {
    Element {
        tag: element.name().to_ascii_lowercase(),
        attrs: element
            .attrs()
            .filter(|(name, _)| is_valid_attribute_name(name))
            .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
            .collect(),
        children: Vec::new(),
    }
}

fn push_node(open: &mut [Element], root: &mut Vec<Node>, node: Node) {
    let siblings = match open.last_mut() {
        Some(parent) => &mut parent.children,
        None => root,
    };
    if let (Node::Text(text), Some(Node::Text(prev))) = (&node, siblings.last_mut()) {
        prev.push_str(text);
        return;
    }
    siblings.push(node);
}

/// Parse an HTML fragment into a node list.
///
/// Comments, doctypes and processing instructions are dropped. Entities in
/// text and attribute values come back decoded.
pub fn parse_fragment(input: &str) -> Vec<Node> {
    let document = Html::parse_fragment(input);
    let mut root = Vec::new();
    let mut open: Vec<Element> = Vec::new();
    // Each frame is a child iterator plus whether it pushed onto `open`.
    let mut frames = vec![(document.root_element().children(), false)];

    loop {
        let Some((children, _)) = frames.last_mut() else {
            break;
        };
        match children.next() {
            Some(child) => match child.value() {
                scraper::Node::Text(text) => {
                    push_node(&mut open, &mut root, Node::Text(text.to_string()));
                }
                scraper::Node::Element(element) => {
                    let kept = open.len() < MAX_NESTING_DEPTH;
                    if kept {
                        open.push(convert_element(element));
                    } else if DROP_CONTENT_ELEMENTS.contains(&element.name()) {
                        continue;
                    }
                    frames.push((child.children(), kept));
                }
                _ => {}
            },
            None => {
                if let Some((_, true)) = frames.pop() {
                    if let Some(element) = open.pop() {
                        push_node(&mut open, &mut root, Node::Element(element));
                    }
                }
            }
        }
    }

    root
}

/// Concatenated text of a node list.
pub fn text_content(nodes: &[Node]) -> String {
    let mut out = String::new();
    collect_text(nodes, &mut out);
    out
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => collect_text(&element.children, out),
        }
    }
}

/// Serialize a node list back to markup.
pub fn serialize(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(node, &mut out);
    }
    out
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(text) => out.push_str(&escape_text(text)),
        Node::Element(element) => {
            out.push('<');
            out.push_str(&element.tag);
            for (name, value) in &element.attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape_attribute(value));
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&element.tag.as_str()) {
                return;
            }
            if LEADING_NEWLINE_ELEMENTS.contains(&element.tag.as_str()) {
                if let Some(Node::Text(text)) = element.children.first() {
                    if text.starts_with('\n') {
                        out.push('\n');
                    }
                }
            }
            for child in &element.children {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
    }
}

fn escape_with(s: &str, escape: impl Fn(char) -> Option<&'static str>) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match escape(c) {
            Some(entity) => out.push_str(entity),
            None => out.push(c),
        }
    }
    out
}

fn escape_text(s: &str) -> String {
    escape_with(s, |c| match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        _ => None,
    })
}

fn escape_attribute(s: &str) -> String {
    escape_with(s, |c| match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        _ => None,
    })
}

/// Escape every character with markup meaning.
pub fn escape_html(s: &str) -> String {
    escape_with(s, |c| match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        '\'' => Some("&#39;"),
        _ => None,
    })
}
