//! Tool-instruction builder and re-injector (4.C).
//!
//! Renders the fixed system-prompt block describing the
//! `<toolbridge:calls>` wrapper protocol, decides where to inject it
//! into a converted request's message list, and decides when a
//! reminder needs to be re-injected into a long-running conversation.

use crate::types::{GenericMessage, Role, Tool};

/// Header marker used to detect that instructions were already injected.
pub const MARKER_HEADER: &str = "# TOOL USAGE INSTRUCTIONS";
/// Secondary marker, kept distinct from the wire protocol tag
/// (`toolbridge:calls`) on purpose: older reminders used this spelling
/// and the dedup check still honors it.
pub const MARKER_ALT: &str = "<toolbridge_calls>";

const WRAPPER_OPEN: &str = "<toolbridge:calls>";
const WRAPPER_CLOSE: &str = "</toolbridge:calls>";

fn contains_marker(text: &str) -> bool {
    text.contains(MARKER_HEADER) || text.contains(MARKER_ALT)
}

/// Render the fixed instruction block for the given tool set.
pub fn build_system_instructions(tools: &[Tool]) -> String {
    let mut out = String::new();
    out.push_str(MARKER_HEADER);
    out.push_str("\n\n");
    out.push_str("You have access to the following tools. To call one, respond with a ");
    out.push_str(WRAPPER_OPEN);
    out.push_str(" block containing one child element per call, whose tag name is the tool name and whose children are its arguments.\n\n");
    out.push_str("Available tools:\n");
    for tool in tools {
        out.push_str("- ");
        out.push_str(&render_tool_line(tool));
        out.push('\n');
    }
    out.push('\n');
    if let Some(first) = tools.first() {
        out.push_str("Example:\n");
        out.push_str(WRAPPER_OPEN);
        out.push('\n');
        out.push_str(&format!("  <{}>\n", first.name));
        for (name, _) in schema_properties(first) {
            out.push_str(&format!("    <{name}>value</{name}>\n"));
        }
        out.push_str(&format!("  </{}>\n", first.name));
        out.push_str(WRAPPER_CLOSE);
        out.push_str("\n\n");
    }
    out.push_str("Rules:\n");
    out.push_str("- Only call tools listed above, by their exact name.\n");
    out.push_str(&format!(
        "- Always wrap every call in {WRAPPER_OPEN}...{WRAPPER_CLOSE}, even a single call.\n"
    ));
    out.push_str("- Respond with plain text, not a tool call, when no tool is needed.\n");
    out
}

fn render_tool_line(tool: &Tool) -> String {
    let description = tool.description.as_deref().unwrap_or("");
    let required = required_params(tool);
    let params: Vec<String> = schema_properties(tool)
        .into_iter()
        .map(|(name, ty)| {
            if required.contains(&name) {
                format!("{name}*:{ty}")
            } else {
                format!("{name}:{ty}")
            }
        })
        .collect();
    if params.is_empty() {
        format!("{}: {}", tool.name, description)
    } else {
        format!("{}: {} | params {}", tool.name, description, params.join(", "))
    }
}

fn schema_properties(tool: &Tool) -> Vec<(String, String)> {
    let Some(props) = tool.parameters_schema.get("properties").and_then(|v| v.as_object()) else {
        return Vec::new();
    };
    props
        .iter()
        .map(|(name, schema)| {
            let ty = schema
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("string")
                .to_string();
            (name.clone(), ty)
        })
        .collect()
}

fn required_params(tool: &Tool) -> Vec<String> {
    tool.parameters_schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Apply the injection policy (step 1-3 of 4.C) to a converted backend
/// request's message list. No-op if `tools` is empty or instructions
/// are already present.
pub fn inject_instructions(messages: &mut Vec<GenericMessage>, tools: &[Tool]) {
    if tools.is_empty() {
        return;
    }

    if let Some(system_idx) = messages.iter().position(|m| m.role == Role::System) {
        if contains_marker(&messages[system_idx].content) {
            return;
        }
        let block = build_system_instructions(tools);
        messages[system_idx].content.push_str("\n\n---\n\n");
        messages[system_idx].content.push_str(&block);
        messages[system_idx].content.push_str(
            "\nThese are the only tools available to you; do not invent others.",
        );
        return;
    }

    let mut preamble = String::from(
        "You are a helpful assistant with access to tools described below.\n\n",
    );
    preamble.push_str(&build_system_instructions(tools));
    messages.insert(0, GenericMessage::text(Role::System, preamble));
}

/// Outcome of the re-injection check (4.C, paragraph 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReinjectionDecision {
    /// Whether a reminder should be inserted.
    pub should_inject: bool,
    /// The role the reminder message should carry, when `should_inject`.
    pub role: Role,
}

/// Cheap token estimate: `ceil(chars/4)`, no tokenizer dependency.
fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Decide whether a reminder needs to be re-injected, given the full
/// message history (already containing the initial injection) and the
/// configured thresholds.
pub fn should_reinject(
    messages: &[GenericMessage],
    message_count_threshold: usize,
    token_count_threshold: usize,
) -> ReinjectionDecision {
    let none = ReinjectionDecision {
        should_inject: false,
        role: Role::System,
    };

    let Some(last_system_idx) = messages.iter().rposition(|m| m.role == Role::System) else {
        return none;
    };

    let since = &messages[last_system_idx + 1..];
    if since.is_empty() {
        return none;
    }

    let tail_start = messages.len().saturating_sub(6);
    if messages[tail_start..]
        .iter()
        .any(|m| contains_marker(&m.content))
    {
        return none;
    }

    let token_estimate: usize = since.iter().map(|m| estimate_tokens(&m.content)).sum();
    let exceeded_count = since.len() > message_count_threshold;
    let exceeded_tokens = token_estimate > token_count_threshold;
    if !exceeded_count && !exceeded_tokens {
        return none;
    }

    let system_count = messages.iter().filter(|m| m.role == Role::System).count();
    let role = if system_count <= 1 { Role::System } else { Role::User };

    ReinjectionDecision {
        should_inject: true,
        role,
    }
}

/// Render the short reminder text inserted by re-injection. Carries the
/// header marker so a later `should_reinject` scan recognizes it.
pub fn build_reminder() -> String {
    format!(
        "{MARKER_HEADER}\n\nReminder: invoke tools only via a {WRAPPER_OPEN}...{WRAPPER_CLOSE} block."
    )
}
