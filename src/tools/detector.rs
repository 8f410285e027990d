//! Tool-call detector (4.A).
//!
//! Pure, side-effect-free classification of a text buffer as
//! definitely-not / maybe / complete tool call. Runs on every content
//! delta in the `PASSTHROUGH` state of a streaming processor, and once
//! on the full text of a non-streaming response before parsing.

use std::collections::HashSet;

/// Tags that, when they lead the buffer, mean "this is markdown/HTML
/// output, never buffer it looking for a tool call". Kept as a plain
/// slice so it stays easy to extend (the exact prefix list is empirical
/// per the design notes).
const NON_TOOL_LEADING_TAGS: &[&str] = &[
    "div", "span", "p", "h1", "h2", "h3", "h4", "h5", "h6", "style", "script", "html", "body",
    "form", "ul", "ol", "li", "table", "tr", "td", "th", "a", "img", "br", "hr", "pre", "code",
];

const WRAPPER_TAG: &str = "toolbridge:calls";

/// Result of classifying a text buffer against a known-tools set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Detection {
    /// Local name of the root element, once one has been identified.
    pub root_tag_name: Option<String>,
    /// `true` when the buffer merely *might* resolve into a tool call
    /// (an open `<` with an ambiguous or partial tag name).
    pub is_potential: bool,
    /// `true` when the buffer should keep being buffered rather than
    /// flushed as content (potential or confirmed tool call).
    pub might_be_tool_call: bool,
    /// `true` when a complete, balanced element for a known tool (or the
    /// `<toolbridge:calls>` wrapper) is already present in the buffer.
    pub is_completed_xml: bool,
}

/// Classify `buffer` against the set of `known_tools` (tool names
/// declared in the current request).
pub fn detect(buffer: &str, known_tools: &HashSet<String>) -> Detection {
    let trimmed = buffer.trim_start();

    if leads_with_non_tool_tag(trimmed) {
        return Detection::default();
    }

    if let Some((name, start)) = find_known_tool_open_tag(trimmed, known_tools) {
        let rest = &trimmed[start..];
        let is_completed_xml = has_matching_close_tag(rest, &name);
        return Detection {
            root_tag_name: Some(name),
            is_potential: false,
            might_be_tool_call: true,
            is_completed_xml,
        };
    }

    if trimmed.contains(&format!("<{WRAPPER_TAG}")) {
        return Detection {
            root_tag_name: Some(WRAPPER_TAG.to_string()),
            is_potential: true,
            might_be_tool_call: true,
            is_completed_xml: trimmed.contains(&format!("</{WRAPPER_TAG}>")),
        };
    }

    if has_partial_tool_prefix(trimmed, known_tools) {
        return Detection {
            root_tag_name: None,
            is_potential: true,
            might_be_tool_call: true,
            is_completed_xml: false,
        };
    }

    Detection::default()
}

/// Does `text` begin (after leading whitespace, which the caller already
/// trimmed) with one of the fixed non-tool HTML tags?
fn leads_with_non_tool_tag(text: &str) -> bool {
    let Some(rest) = text.strip_prefix('<') else {
        return false;
    };
    let name_end = rest
        .find(|c: char| c == '>' || c == ' ' || c == '/' || c.is_whitespace())
        .unwrap_or(rest.len());
    let name = &rest[..name_end];
    NON_TOOL_LEADING_TAGS
        .iter()
        .any(|tag| tag.eq_ignore_ascii_case(name))
}

/// Find the earliest `<name` (or `<ns:name`) whose local name matches a
/// known tool, case-insensitively. Returns the matched local name and
/// the byte offset of the `<`.
fn find_known_tool_open_tag(text: &str, known_tools: &HashSet<String>) -> Option<(String, usize)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while let Some(rel) = text[i..].find('<') {
        let pos = i + rel;
        if bytes.get(pos + 1) == Some(&b'/') || bytes.get(pos + 1) == Some(&b'!') {
            i = pos + 1;
            continue;
        }
        let rest = &text[pos + 1..];
        let name_end = rest
            .find(|c: char| c == '>' || c == '/' || c.is_whitespace())
            .unwrap_or(rest.len());
        let raw_name = &rest[..name_end];
        if raw_name.is_empty() {
            i = pos + 1;
            continue;
        }
        let local = raw_name.rsplit(':').next().unwrap_or(raw_name);
        if let Some(matched) = known_tools.iter().find(|t| t.eq_ignore_ascii_case(local)) {
            return Some((matched.clone(), pos));
        }
        i = pos + 1;
    }
    None
}

/// Does `text` (starting at the open tag) contain a textual close tag
/// `</name>` (or `</ns:name>`) for `name`?
fn has_matching_close_tag(text: &str, name: &str) -> bool {
    let lower = text.to_lowercase();
    let direct = format!("</{}>", name.to_lowercase());
    if lower.contains(&direct) {
        return true;
    }
    // Namespaced close, e.g. </toolbridge:search>
    lower
        .match_indices("</")
        .any(|(i, _)| {
            let rest = &lower[i + 2..];
            rest.split('>').next().map(|tag| {
                tag.rsplit(':').next().unwrap_or(tag) == name.to_lowercase()
            }) == Some(true)
        })
}

/// Does `text` contain a `<` immediately followed by a non-empty prefix
/// of some known tool name (the tag name hasn't finished arriving yet)?
fn has_partial_tool_prefix(text: &str, known_tools: &HashSet<String>) -> bool {
    let mut i = 0;
    while let Some(rel) = text[i..].find('<') {
        let pos = i + rel;
        let rest = &text[pos + 1..];
        if rest.is_empty() {
            // trailing bare `<` — ambiguous, treat as potential.
            return true;
        }
        if rest.starts_with('/') || rest.starts_with('!') {
            i = pos + 1;
            continue;
        }
        let candidate_end = rest
            .find(|c: char| c == '>' || c.is_whitespace())
            .unwrap_or(rest.len());
        let candidate = &rest[..candidate_end].to_lowercase();
        let is_prefix_of_known = known_tools.iter().any(|t| {
            let t = t.to_lowercase();
            !candidate.is_empty() && (t.starts_with(candidate.as_str()) || candidate.starts_with(t.as_str()))
        });
        if is_prefix_of_known {
            return true;
        }
        i = pos + 1;
    }
    false
}
