//! Translation engine (4.E): orchestrates the per-provider converters,
//! the capability filter (4.I), and tool-instruction injection (4.C).

use std::collections::HashSet;

use crate::tools;
use crate::types::{GenericRequest, GenericResponse, GenericStreamChunk, Provider, ProxyError, Result, ToolCallFunction, ToolCallItem};

use super::{capabilities, ollama, openai};

/// Knobs the chat dispatcher threads through from configuration; kept
/// as a bag rather than individual args since they all gate the same
/// step (tool-instruction injection/re-injection).
#[derive(Debug, Clone, Copy)]
pub struct TranslateOptions {
    /// Keep native `tools`/`tool_choice` fields on the Ollama-bound
    /// request in addition to XML injection (`PASS_TOOLS`).
    pub pass_tools: bool,
    /// Whether re-injection is evaluated at all (`ENABLE_TOOL_REINJECTION`).
    pub enable_reinjection: bool,
    /// Message-count threshold for re-injection.
    pub reinjection_message_count: usize,
    /// Token-count threshold for re-injection.
    pub reinjection_token_count: usize,
    /// Override the automatic system-vs-user role choice from 4.C
    /// (`TOOL_REINJECTION_TYPE`). `None` keeps the automatic rule.
    pub reinjection_role_override: Option<crate::types::Role>,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            pass_tools: false,
            enable_reinjection: true,
            reinjection_message_count: 3,
            reinjection_token_count: 1000,
            reinjection_role_override: None,
        }
    }
}

/// Result of [`translate_request`]: the target-shaped wire body plus the
/// tool names the client declared, needed downstream for XML extraction
/// on the response path.
#[derive(Debug, Clone)]
pub struct TranslatedRequest {
    pub body: serde_json::Value,
    pub known_tool_names: HashSet<String>,
    pub generic: GenericRequest,
}

fn request_to_generic(raw: &serde_json::Value, from: Provider) -> Result<GenericRequest> {
    match from {
        Provider::OpenAI => {
            let wire = serde_json::from_value(raw.clone())
                .map_err(|e| ProxyError::ClientValidation(format!("invalid OpenAI request: {e}")))?;
            Ok(openai::request_to_generic(wire))
        }
        Provider::Ollama => {
            let wire = serde_json::from_value(raw.clone())
                .map_err(|e| ProxyError::ClientValidation(format!("invalid Ollama request: {e}")))?;
            Ok(ollama::request_to_generic(wire))
        }
    }
}

fn request_from_generic(generic: &GenericRequest, to: Provider) -> serde_json::Value {
    match to {
        Provider::OpenAI => serde_json::to_value(openai::request_from_generic(generic))
            .expect("GenericRequest always serializes"),
        Provider::Ollama => serde_json::to_value(ollama::request_from_generic(generic))
            .expect("GenericRequest always serializes"),
    }
}

/// `requestToGeneric` → capability filter → (Ollama target: 4.C) →
/// `requestFromGeneric`.
pub fn translate_request(
    raw: &serde_json::Value,
    from: Provider,
    to: Provider,
    options: TranslateOptions,
) -> Result<TranslatedRequest> {
    let mut generic = request_to_generic(raw, from)?;
    let known_tool_names: HashSet<String> = generic.tools.iter().map(|t| t.name.clone()).collect();

    capabilities::filter_for_target(&mut generic, to);

    if to == Provider::Ollama && !known_tool_names.is_empty() {
        let declared_tools = generic.tools.clone();
        tools::inject_instructions(&mut generic.messages, &declared_tools);

        if options.enable_reinjection {
            let decision = tools::should_reinject(
                &generic.messages,
                options.reinjection_message_count,
                options.reinjection_token_count,
            );
            if decision.should_inject {
                let role = options.reinjection_role_override.unwrap_or(decision.role);
                generic
                    .messages
                    .push(crate::types::GenericMessage::text(role, tools::instructions::build_reminder()));
            }
        }

        if !options.pass_tools {
            generic.tools.clear();
            generic.tool_choice = None;
        }
    }

    let body = request_from_generic(&generic, to);
    Ok(TranslatedRequest {
        body,
        known_tool_names,
        generic,
    })
}

fn response_to_generic(raw: &serde_json::Value, from: Provider) -> Result<GenericResponse> {
    match from {
        Provider::OpenAI => {
            let wire = serde_json::from_value(raw.clone())
                .map_err(|e| ProxyError::BackendUpstream { status: 502, body: format!("malformed OpenAI response: {e}") })?;
            Ok(openai::response_to_generic(wire))
        }
        Provider::Ollama => {
            let wire = serde_json::from_value(raw.clone())
                .map_err(|e| ProxyError::BackendUpstream { status: 502, body: format!("malformed Ollama response: {e}") })?;
            Ok(ollama::response_to_generic(wire))
        }
    }
}

fn response_from_generic(generic: &GenericResponse, to: Provider) -> serde_json::Value {
    match to {
        Provider::OpenAI => serde_json::to_value(openai::response_from_generic(generic))
            .expect("GenericResponse always serializes"),
        Provider::Ollama => serde_json::to_value(ollama::response_from_generic(generic))
            .expect("GenericResponse always serializes"),
    }
}

/// `responseToGeneric`, with an XML tool-call extraction attempt when
/// `known_tool_names` is non-empty and the backend didn't report native
/// tool calls, → `responseFromGeneric`.
pub fn translate_response(
    raw: &serde_json::Value,
    from: Provider,
    to: Provider,
    known_tool_names: &HashSet<String>,
) -> Result<serde_json::Value> {
    let mut generic = response_to_generic(raw, from)?;

    if !known_tool_names.is_empty() {
        for choice in &mut generic.choices {
            if choice.message.tool_calls.is_some() {
                continue;
            }
            if let Some(extracted) = tools::extract_first_tool_call(&choice.message.content, known_tool_names) {
                choice.message.tool_calls = Some(vec![ToolCallItem {
                    id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                    call_type: "function".to_string(),
                    function: ToolCallFunction {
                        name: extracted.name,
                        arguments: extracted.arguments.to_string(),
                    },
                }]);
                choice.finish_reason = Some(crate::types::FinishReason::ToolCalls);
            }
        }
    }

    Ok(response_from_generic(&generic, to))
}

pub(crate) fn stream_chunk_to_generic(raw: &serde_json::Value, from: Provider) -> Result<GenericStreamChunk> {
    match from {
        Provider::OpenAI => {
            let wire = serde_json::from_value(raw.clone())
                .map_err(|e| ProxyError::Internal(format!("malformed OpenAI chunk: {e}")))?;
            Ok(openai::stream_chunk_to_generic(wire))
        }
        Provider::Ollama => {
            let wire = serde_json::from_value(raw.clone())
                .map_err(|e| ProxyError::Internal(format!("malformed Ollama chunk: {e}")))?;
            Ok(ollama::stream_chunk_to_generic(wire))
        }
    }
}

pub(crate) fn stream_chunk_from_generic(generic: &GenericStreamChunk, to: Provider) -> serde_json::Value {
    match to {
        Provider::OpenAI => serde_json::to_value(openai::stream_chunk_from_generic(generic))
            .expect("GenericStreamChunk always serializes"),
        Provider::Ollama => serde_json::to_value(ollama::stream_chunk_from_generic(generic))
            .expect("GenericStreamChunk always serializes"),
    }
}

/// Symmetric per-chunk translation, used by the streaming processors for
/// chunks that pass straight through without tool-call buffering.
pub fn translate_stream_chunk(
    raw: &serde_json::Value,
    from: Provider,
    to: Provider,
) -> Result<serde_json::Value> {
    let generic = stream_chunk_to_generic(raw, from)?;
    Ok(stream_chunk_from_generic(&generic, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_to_ollama_injects_instructions_when_tools_declared() {
        let raw = serde_json::json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "what's the weather"}],
            "tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {"type": "object", "properties": {}}}}]
        });
        let translated = translate_request(&raw, Provider::OpenAI, Provider::Ollama, TranslateOptions::default()).unwrap();
        assert!(translated.known_tool_names.contains("get_weather"));
        let messages = translated.body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert!(messages[0]["content"].as_str().unwrap().contains("TOOL USAGE INSTRUCTIONS"));
        // pass_tools defaults false: native tool fields should be stripped.
        assert!(translated.body.get("tools").is_none());
    }

    #[test]
    fn pass_tools_keeps_native_fields_alongside_injection() {
        let raw = serde_json::json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "function", "function": {"name": "search", "parameters": {"type": "object", "properties": {}}}}]
        });
        let options = TranslateOptions { pass_tools: true, ..TranslateOptions::default() };
        let translated = translate_request(&raw, Provider::OpenAI, Provider::Ollama, options).unwrap();
        assert!(translated.body.get("tools").is_some());
    }

    #[test]
    fn ollama_to_openai_extracts_xml_tool_call_from_content() {
        let raw = serde_json::json!({
            "model": "llama3",
            "created_at": "2026-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": "<get_weather><location>SF</location></get_weather>"},
            "done": true,
            "done_reason": "stop"
        });
        let mut known = HashSet::new();
        known.insert("get_weather".to_string());
        let translated = translate_response(&raw, Provider::Ollama, Provider::OpenAI, &known).unwrap();
        let choice = &translated["choices"][0];
        assert_eq!(choice["finish_reason"], "tool_calls");
        assert_eq!(choice["message"]["tool_calls"][0]["function"]["name"], "get_weather");
    }

    #[test]
    fn response_without_known_tools_is_untouched() {
        let raw = serde_json::json!({
            "model": "llama3",
            "created_at": "2026-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": "just text"},
            "done": true
        });
        let translated = translate_response(&raw, Provider::Ollama, Provider::OpenAI, &HashSet::new()).unwrap();
        assert_eq!(translated["choices"][0]["message"]["content"], "just text");
        assert!(translated["choices"][0]["message"]["tool_calls"].is_null());
    }
}
