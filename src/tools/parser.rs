//! XML balanced-element parser (4.B).
//!
//! Pure. Extracts the first tool invocation from a text buffer known (or
//! suspected, via 4.A) to contain one. Tolerates malformed input by
//! falling back to a textual close-tag search, and never panics or
//! raises on bad XML — absence of a result is the failure mode.

use std::collections::HashSet;

use crate::types::ExtractedToolCall;

/// Names whose content is preserved verbatim: no entity decoding, no
/// CDATA unwrapping, no further parsing even if it looks like markup.
const VERBATIM_CHILD_NAMES: &[&str] = &["code", "html", "markdown", "md", "body", "content"];

const WRAPPER_TAG: &str = "toolbridge:calls";

/// Extract the first tool call whose root element's local name is in
/// `known_tools`. Also accepts elements wrapped in `<toolbridge:calls>`.
pub fn extract_first_tool_call(raw: &str, known_tools: &HashSet<String>) -> Option<ExtractedToolCall> {
    let work = preprocess(raw);
    let text = work.as_str();

    let (name, open_end) = find_known_open_tag(text, known_tools)?;
    let local_lower = name.to_lowercase();
    let span = locate_element_body(text, open_end, &local_lower)?;
    let inner = &text[span.inner_start..span.inner_end];

    let arguments = build_arguments(inner, &local_lower);
    Some(ExtractedToolCall { name, arguments })
}

// ============= Preprocessing =============

fn preprocess(raw: &str) -> String {
    let mut s = raw.to_string();
    s = strip_processing_instruction(&s);
    s = unwrap_fenced_xml_block(&s);
    s = unwrap_wrapper_envelope(&s);
    s
}

fn strip_processing_instruction(s: &str) -> String {
    if let Some(start) = s.find("<?") {
        if let Some(rel_end) = s[start..].find("?>") {
            let end = start + rel_end + 2;
            let mut out = String::with_capacity(s.len());
            out.push_str(&s[..start]);
            out.push_str(&s[end..]);
            return out;
        }
    }
    s.to_string()
}

fn unwrap_fenced_xml_block(s: &str) -> String {
    if let Some(start) = s.find("```xml") {
        let body_start = start + "```xml".len();
        if let Some(rel_end) = s[body_start..].find("```") {
            let body_end = body_start + rel_end;
            return s[body_start..body_end].trim().to_string();
        }
    }
    s.to_string()
}

fn unwrap_wrapper_envelope(s: &str) -> String {
    let trimmed = s.trim_start();
    let open = format!("<{WRAPPER_TAG}");
    if let Some(rel) = trimmed.find(&open) {
        // Only unwrap if the wrapper leads the (trimmed) buffer.
        if trimmed[..rel].trim().is_empty() {
            if let Some(tag_end_rel) = trimmed[rel..].find('>') {
                let inner_start = rel + tag_end_rel + 1;
                let close = format!("</{WRAPPER_TAG}>");
                if let Some(close_rel) = trimmed[inner_start..].find(&close) {
                    return trimmed[inner_start..inner_start + close_rel].to_string();
                }
            }
        }
    }
    s.to_string()
}

// ============= Tag scanning =============

struct ElementSpan {
    inner_start: usize,
    inner_end: usize,
}

/// Find the first opening tag whose local name matches a known tool.
/// Returns the matched name (original case) and the byte offset right
/// after the tag's closing `>`.
fn find_known_open_tag(text: &str, known_tools: &HashSet<String>) -> Option<(String, usize)> {
    let mut pos = 0;
    while let Some(rel) = text[pos..].find('<') {
        let start = pos + rel;
        if let Some(skip_to) = skip_special(text, start) {
            pos = skip_to;
            continue;
        }
        let bytes = text.as_bytes();
        if bytes.get(start + 1) == Some(&b'/') {
            pos = start + 1;
            continue;
        }
        if let Some(tag) = parse_tag(text, start) {
            let local = tag.name.rsplit(':').next().unwrap_or(&tag.name);
            if let Some(matched) = known_tools.iter().find(|t| t.eq_ignore_ascii_case(local)) {
                if !tag.self_closing {
                    return Some((matched.clone(), tag.end));
                }
            }
            pos = tag.end;
        } else {
            pos = start + 1;
        }
    }
    None
}

struct Tag {
    name: String,
    is_close: bool,
    self_closing: bool,
    /// Byte offset right after the tag's `>`.
    end: usize,
}

/// Parse a single tag starting at `start` (which must point at `<`),
/// honoring quoted attribute values so an embedded `>` doesn't
/// terminate the tag early.
fn parse_tag(text: &str, start: usize) -> Option<Tag> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'<') {
        return None;
    }
    let is_close = bytes.get(start + 1) == Some(&b'/');
    let name_start = if is_close { start + 2 } else { start + 1 };
    let mut i = name_start;
    let mut in_quote: Option<u8> = None;
    let mut name_end = None;
    while i < bytes.len() {
        let b = bytes[i];
        if name_end.is_none() && (b == b'>' || b == b'/' || b.is_ascii_whitespace()) {
            name_end = Some(i);
        }
        match in_quote {
            Some(q) if b == q => in_quote = None,
            Some(_) => {}
            None => {
                if b == b'"' || b == b'\'' {
                    in_quote = Some(b);
                } else if b == b'>' {
                    let name_end = name_end.unwrap_or(i);
                    let name = text[name_start..name_end].to_string();
                    if name.is_empty() {
                        return None;
                    }
                    let self_closing = i > 0 && bytes[i - 1] == b'/';
                    return Some(Tag {
                        name,
                        is_close,
                        self_closing,
                        end: i + 1,
                    });
                }
            }
        }
        i += 1;
    }
    None
}

/// If `text[pos..]` begins a comment, CDATA section, or processing
/// instruction, return the offset immediately after it; otherwise None.
fn skip_special(text: &str, pos: usize) -> Option<usize> {
    let rest = &text[pos..];
    if let Some(inner) = rest.strip_prefix("<!--") {
        return inner.find("-->").map(|e| pos + 4 + e + 3);
    }
    if let Some(inner) = rest.strip_prefix("<![CDATA[") {
        return inner.find("]]>").map(|e| pos + 9 + e + 3);
    }
    if let Some(inner) = rest.strip_prefix("<?") {
        return inner.find("?>").map(|e| pos + 2 + e + 2);
    }
    None
}

/// Given the byte offset right after a known-tool open tag's `>`,
/// balance nested elements of the same local name (skipping comments,
/// CDATA, PIs, and quoted attributes) to find where it closes. Falls
/// back to a bare textual `</name>` search if the document never
/// balances.
fn locate_element_body(text: &str, open_end: usize, local_lower: &str) -> Option<ElementSpan> {
    let mut depth = 1usize;
    let mut pos = open_end;
    while let Some(rel) = text[pos..].find('<') {
        let start = pos + rel;
        if let Some(skip_to) = skip_special(text, start) {
            pos = skip_to;
            continue;
        }
        if let Some(tag) = parse_tag(text, start) {
            let local = tag.name.rsplit(':').next().unwrap_or(&tag.name).to_lowercase();
            if local == local_lower {
                if tag.is_close {
                    depth -= 1;
                    if depth == 0 {
                        return Some(ElementSpan {
                            inner_start: open_end,
                            inner_end: start,
                        });
                    }
                } else if !tag.self_closing {
                    depth += 1;
                }
            }
            pos = tag.end;
        } else {
            pos = start + 1;
        }
    }

    // Unbalanced: fall back to a plain textual close-tag search.
    let lower = text.to_lowercase();
    let needle = format!("</{local_lower}");
    let mut search_from = open_end;
    while let Some(rel) = lower[search_from..].find(&needle) {
        let candidate = search_from + rel;
        if let Some(gt_rel) = lower[candidate..].find('>') {
            return Some(ElementSpan {
                inner_start: open_end,
                inner_end: candidate,
            });
        } else {
            search_from = candidate + needle.len();
        }
    }
    None
}

// ============= Argument construction =============

fn build_arguments(inner: &str, root_local_lower: &str) -> serde_json::Value {
    let children = collect_immediate_children(inner);
    if children.is_empty() {
        let text = decode_text(inner.trim());
        if text.is_empty() {
            return serde_json::Value::Object(serde_json::Map::new());
        }
        return coerce_leaf(&text);
    }

    // Group by (lowercased) name, preserving first-seen order.
    let mut order: Vec<String> = Vec::new();
    let mut grouped: std::collections::HashMap<String, Vec<serde_json::Value>> =
        std::collections::HashMap::new();

    for child in children {
        let value = value_for_child(&child, root_local_lower);
        if !grouped.contains_key(&child.name_lower) {
            order.push(child.name_lower.clone());
        }
        grouped.entry(child.name_lower).or_default().push(value);
    }

    let mut map = serde_json::Map::new();
    for name in &order {
        let mut values = grouped.remove(name).unwrap_or_default();
        let value = if values.len() == 1 {
            values.pop().unwrap()
        } else {
            serde_json::Value::Array(values)
        };
        map.insert(name.clone(), value);
    }

    // {item: [...]} collapses to a raw list.
    if map.len() == 1 {
        if let Some(items) = map.get("item") {
            if items.is_array() {
                return items.clone();
            }
        }
    }

    serde_json::Value::Object(map)
}

fn value_for_child(child: &Child, root_local_lower: &str) -> serde_json::Value {
    let verbatim = VERBATIM_CHILD_NAMES.contains(&child.name_lower.as_str())
        || (root_local_lower == "think"
            && (child.name_lower == "points" || child.name_lower == "thoughts"));

    if verbatim {
        return serde_json::Value::String(child.inner.to_string());
    }

    let nested = collect_immediate_children(child.inner);
    if !nested.is_empty() {
        return build_arguments(child.inner, root_local_lower);
    }

    let text = decode_text(child.inner.trim());
    if text.is_empty() {
        return serde_json::Value::String(String::new());
    }
    coerce_leaf(&text)
}

struct Child<'a> {
    name_lower: String,
    inner: &'a str,
}

/// Scan `text` for top-level (non-nested) child elements, returning one
/// entry per occurrence in document order (duplicates included; the
/// caller aggregates).
fn collect_immediate_children(text: &str) -> Vec<Child<'_>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(rel) = text[pos..].find('<') {
        let start = pos + rel;
        if let Some(skip_to) = skip_special(text, start) {
            pos = skip_to;
            continue;
        }
        let bytes = text.as_bytes();
        if bytes.get(start + 1) == Some(&b'/') {
            pos = start + 1;
            continue;
        }
        let Some(tag) = parse_tag(text, start) else {
            pos = start + 1;
            continue;
        };
        if tag.is_close {
            pos = tag.end;
            continue;
        }
        let local_lower = tag.name.rsplit(':').next().unwrap_or(&tag.name).to_lowercase();
        if tag.self_closing {
            out.push(Child {
                name_lower: local_lower,
                inner: "",
            });
            pos = tag.end;
            continue;
        }
        match locate_element_body(text, tag.end, &local_lower) {
            Some(span) => {
                out.push(Child {
                    name_lower: local_lower,
                    inner: &text[span.inner_start..span.inner_end],
                });
                // Resume scanning after this element's closing tag.
                pos = find_tag_end_after(text, span.inner_end, &local_lower).unwrap_or(tag.end);
            }
            None => {
                pos = tag.end;
            }
        }
    }
    out
}

/// Given the offset where a close tag's textual match begins (as found
/// by `locate_element_body`'s fallback or balance), return the offset
/// right after its `>`.
fn find_tag_end_after(text: &str, close_start: usize, _local_lower: &str) -> Option<usize> {
    text[close_start..].find('>').map(|e| close_start + e + 1)
}

// ============= Leaf coercion & entity decoding =============

fn coerce_leaf(s: &str) -> serde_json::Value {
    if s == "true" {
        return serde_json::Value::Bool(true);
    }
    if s == "false" {
        return serde_json::Value::Bool(false);
    }
    if let Ok(i) = s.parse::<i64>() {
        if i.to_string() == s {
            return serde_json::Value::Number(serde_json::Number::from(i));
        }
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() && format!("{f}") == s {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return serde_json::Value::Number(n);
            }
        }
    }
    serde_json::Value::String(s.to_string())
}

/// Unwrap CDATA sections (keeping their content raw) and decode the
/// fixed entity set elsewhere in the text.
fn decode_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("<![CDATA[") {
        out.push_str(&decode_entities(&rest[..start]));
        let after = &rest[start + 9..];
        if let Some(end) = after.find("]]>") {
            out.push_str(&after[..end]);
            rest = &after[end + 3..];
        } else {
            out.push_str(after);
            rest = "";
            break;
        }
    }
    out.push_str(&decode_entities(rest));
    out
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_simple_call() {
        let call = extract_first_tool_call(
            "<get_weather><location>SF</location></get_weather>",
            &tools(&["get_weather"]),
        )
        .unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments, serde_json::json!({"location": "SF"}));
    }

    #[test]
    fn adversarial_sql_like_text_is_preserved_verbatim_as_string() {
        let call = extract_first_tool_call(
            "<search><query>'; DROP TABLE users; --</query></search>",
            &tools(&["search"]),
        )
        .unwrap();
        assert_eq!(
            call.arguments,
            serde_json::json!({"query": "'; DROP TABLE users; --"})
        );
    }

    #[test]
    fn coerces_boolean_and_numeric_leaves() {
        let call = extract_first_tool_call(
            "<toggle><enabled>true</enabled><count>3</count><ratio>0.5</ratio></toggle>",
            &tools(&["toggle"]),
        )
        .unwrap();
        assert_eq!(
            call.arguments,
            serde_json::json!({"enabled": true, "count": 3, "ratio": 0.5})
        );
    }

    #[test]
    fn non_round_tripping_numeric_stays_string() {
        let call = extract_first_tool_call(
            "<pay><amount>1.50</amount></pay>",
            &tools(&["pay"]),
        )
        .unwrap();
        assert_eq!(call.arguments, serde_json::json!({"amount": "1.50"}));
    }

    #[test]
    fn repeated_children_become_ordered_array() {
        let call = extract_first_tool_call(
            "<batch><id>1</id><id>2</id><id>3</id></batch>",
            &tools(&["batch"]),
        )
        .unwrap();
        assert_eq!(call.arguments, serde_json::json!({"id": [1, 2, 3]}));
    }

    #[test]
    fn item_only_children_collapse_to_raw_list() {
        let call = extract_first_tool_call(
            "<pick><item>a</item><item>b</item></pick>",
            &tools(&["pick"]),
        )
        .unwrap();
        assert_eq!(call.arguments, serde_json::json!(["a", "b"]));
    }

    #[test]
    fn code_children_are_not_entity_decoded() {
        let call = extract_first_tool_call(
            "<run><code>if a &lt; b { x() }</code></run>",
            &tools(&["run"]),
        )
        .unwrap();
        assert_eq!(
            call.arguments,
            serde_json::json!({"code": "if a &lt; b { x() }"})
        );
    }

    #[test]
    fn unwraps_wrapper_envelope() {
        let call = extract_first_tool_call(
            "<toolbridge:calls><search><query>cats</query></search></toolbridge:calls>",
            &tools(&["search"]),
        )
        .unwrap();
        assert_eq!(call.name, "search");
    }

    #[test]
    fn unbalanced_xml_falls_back_to_textual_close_search() {
        let call = extract_first_tool_call(
            "<search><query>cats</search>",
            &tools(&["search"]),
        )
        .unwrap();
        assert_eq!(call.name, "search");
    }

    #[test]
    fn strips_processing_instruction_and_fenced_block() {
        let call = extract_first_tool_call(
            "<?xml version=\"1.0\"?>\n```xml\n<search><query>x</query></search>\n```",
            &tools(&["search"]),
        )
        .unwrap();
        assert_eq!(call.name, "search");
    }

    #[test]
    fn no_known_tool_returns_none() {
        assert!(extract_first_tool_call("<widget>x</widget>", &tools(&["search"])).is_none());
    }

    #[test]
    fn nested_mapping_recurses() {
        let call = extract_first_tool_call(
            "<book><author><first>Ada</first><last>Lovelace</last></author></book>",
            &tools(&["book"]),
        )
        .unwrap();
        assert_eq!(
            call.arguments,
            serde_json::json!({"author": {"first": "Ada", "last": "Lovelace"}})
        );
    }
}
