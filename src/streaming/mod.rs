//! Streaming processors (4.F): one state machine shared by both client
//! framings.
//!
//! States: `PASSTHROUGH -> BUFFERING_POTENTIAL_TOOL_CALL ->
//! COMPLETE_TOOL_CALL_EMITTED -> CLOSED`. Represented implicitly via
//! [`StreamProcessorState`] rather than an explicit enum:
//! `closed` flag, `tool_call_already_sent`, and
//! `partial.might_be_tool_call` together identify the current state.

pub mod ollama_ndjson;
pub mod openai_sse;

use std::collections::HashSet;

use uuid::Uuid;

use crate::tools;
use crate::types::{
    FinishReason, GenericDelta, GenericStreamChoice, GenericStreamChunk, Role, StreamProcessorState,
    ToolCallFunction, ToolCallItem,
};

pub use ollama_ndjson::OllamaNdjsonProcessor;
pub use openai_sse::OpenAiSseProcessor;

/// Default cap on `unified_buffer` before tail-truncation (1 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;
/// Tail length kept after truncation (10 KiB).
const TRUNCATE_TAIL: usize = 10 * 1024;

fn template_chunk(state: &StreamProcessorState, provider: crate::types::Provider) -> GenericStreamChunk {
    GenericStreamChunk {
        id: format!("toolbridge-{}", Uuid::new_v4()),
        created: 0,
        model: state.model.clone(),
        provider,
        choices: vec![],
        usage: None,
    }
}

fn content_chunk(template: &GenericStreamChunk, text: &str) -> GenericStreamChunk {
    let mut chunk = template.clone();
    chunk.choices = vec![GenericStreamChoice {
        index: 0,
        delta: GenericDelta {
            role: None,
            content: Some(text.to_string()),
            tool_calls: None,
        },
        finish_reason: None,
    }];
    chunk
}

/// First chunk of a synthesized tool-call sequence: announces the call
/// (`role=assistant`, `id`, `type=function`, `function.name`) with no
/// arguments yet, per 4.F's "first chunk ... containing id, type,
/// function.name" followed separately by the arguments.
fn tool_call_announce_chunk(template: &GenericStreamChunk, id: &str, name: &str) -> GenericStreamChunk {
    let mut chunk = template.clone();
    chunk.choices = vec![GenericStreamChoice {
        index: 0,
        delta: GenericDelta {
            role: Some(Role::Assistant),
            content: None,
            tool_calls: Some(vec![ToolCallItem {
                id: id.to_string(),
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: name.to_string(),
                    arguments: String::new(),
                },
            }]),
        },
        finish_reason: None,
    }];
    chunk
}

/// Follow-up chunk streaming `function.arguments` as a JSON string.
fn tool_call_arguments_chunk(
    template: &GenericStreamChunk,
    id: &str,
    name: &str,
    arguments: &str,
) -> GenericStreamChunk {
    let mut chunk = template.clone();
    chunk.choices = vec![GenericStreamChoice {
        index: 0,
        delta: GenericDelta {
            role: None,
            content: None,
            tool_calls: Some(vec![ToolCallItem {
                id: id.to_string(),
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            }]),
        },
        finish_reason: None,
    }];
    chunk
}

/// A bare usage-bearing chunk with no choices, matching the shape a
/// real OpenAI-shaped backend sends as its final `stream_options.
/// include_usage` event (after the chunk that already carried
/// `finish_reason`).
fn usage_only_chunk(template: &GenericStreamChunk, usage: crate::types::Usage) -> GenericStreamChunk {
    let mut chunk = template.clone();
    chunk.choices = vec![];
    chunk.usage = Some(usage);
    chunk
}

fn finish_chunk(
    template: &GenericStreamChunk,
    reason: FinishReason,
    usage: Option<crate::types::Usage>,
) -> GenericStreamChunk {
    let mut chunk = template.clone();
    chunk.choices = vec![GenericStreamChoice {
        index: 0,
        delta: GenericDelta::default(),
        finish_reason: Some(reason),
    }];
    chunk.usage = usage;
    chunk
}

fn tail_truncate(s: &str, keep_bytes: usize) -> String {
    if s.len() <= keep_bytes {
        return s.to_string();
    }
    let start = s.len() - keep_bytes;
    let boundary = (start..s.len()).find(|&i| s.is_char_boundary(i)).unwrap_or(s.len());
    s[boundary..].to_string()
}

/// Try to pull a complete tool call out of `state.unified_buffer`. If one
/// is found, emit the leading-text content chunk (if any) followed by
/// the tool-call chunk sequence and a `finish_reason=tool_calls` chunk,
/// and mark the state so later deltas are suppressed. If none is found
/// (a false-positive classification, or the end-of-stream final pass),
/// flush the whole buffer as content instead.
fn resolve_buffer(
    state: &mut StreamProcessorState,
    known_tools: &HashSet<String>,
    template: &GenericStreamChunk,
) -> Vec<GenericStreamChunk> {
    let mut out = Vec::new();

    match tools::extract_first_tool_call(&state.unified_buffer, known_tools) {
        Some(extracted) => {
            let lead_end = state.unified_buffer.find('<').unwrap_or(0);
            let leading = &state.unified_buffer[..lead_end];
            if !leading.is_empty() {
                out.push(content_chunk(template, leading));
            }
            let call_id = format!("call_{}", Uuid::new_v4().simple());
            out.push(tool_call_announce_chunk(template, &call_id, &extracted.name));
            out.push(tool_call_arguments_chunk(
                template,
                &call_id,
                &extracted.name,
                &extracted.arguments.to_string(),
            ));
            out.push(finish_chunk(template, FinishReason::ToolCalls, None));
            state.tool_call_already_sent = true;
        }
        None => {
            if !state.unified_buffer.is_empty() {
                out.push(content_chunk(template, &state.unified_buffer.clone()));
            }
        }
    }

    state.partial.reset();
    state.unified_buffer.clear();
    out
}

/// Advance the state machine by one backend content delta, already
/// normalized to the generic representation. Returns zero or more
/// generic chunks ready to be rendered into the client's wire framing.
pub fn advance(
    state: &mut StreamProcessorState,
    chunk: &GenericStreamChunk,
    known_tools: &HashSet<String>,
    max_buffer_size: usize,
) -> Vec<GenericStreamChunk> {
    if state.closed {
        return vec![];
    }

    let template = {
        let mut t = chunk.clone();
        t.choices = vec![];
        t
    };

    let mut out = Vec::new();
    let delta_text = chunk
        .choices
        .first()
        .and_then(|c| c.delta.content.clone())
        .unwrap_or_default();
    let finish_reason = chunk.choices.first().and_then(|c| c.finish_reason);
    let chunk_usage = chunk.usage;
    if let Some(usage) = chunk_usage {
        state.prompt_tokens = Some(usage.prompt_tokens);
        state.completion_tokens = Some(usage.completion_tokens);
    }

    if state.tool_call_already_sent {
        // COMPLETE_TOOL_CALL_EMITTED: content is discarded; usage/finish
        // chunks from the backend are still forwarded.
        if finish_reason.is_some() || chunk_usage.is_some() {
            out.push(finish_chunk(
                &template,
                finish_reason.unwrap_or(FinishReason::Stop),
                if state.include_usage { chunk_usage } else { None },
            ));
        }
        return out;
    }

    if !state.partial.might_be_tool_call {
        // PASSTHROUGH
        let probe = format!("{}{}", state.unified_buffer, delta_text);
        let detection = tools::detect(&probe, known_tools);
        if !detection.might_be_tool_call {
            if !delta_text.is_empty() {
                out.push(content_chunk(&template, &delta_text));
            }
        } else {
            state.unified_buffer = probe;
            state.partial.might_be_tool_call = true;
            state.partial.root_tag = detection.root_tag_name;
            if detection.is_completed_xml {
                out.extend(resolve_buffer(state, known_tools, &template));
            }
        }
    } else {
        // BUFFERING_POTENTIAL_TOOL_CALL
        state.unified_buffer.push_str(&delta_text);
        let detection = tools::detect(&state.unified_buffer, known_tools);
        if detection.is_completed_xml {
            out.extend(resolve_buffer(state, known_tools, &template));
        } else if !detection.might_be_tool_call {
            if !state.unified_buffer.is_empty() {
                out.push(content_chunk(&template, &state.unified_buffer.clone()));
            }
            state.partial.reset();
            state.unified_buffer.clear();
        } else if state.unified_buffer.len() > max_buffer_size {
            let tail = tail_truncate(&state.unified_buffer, TRUNCATE_TAIL);
            out.push(content_chunk(&template, &tail));
            state.partial.reset();
            state.unified_buffer.clear();
        }
    }

    if let Some(fr) = finish_reason {
        out.push(finish_chunk(
            &template,
            fr,
            if state.include_usage { chunk_usage } else { None },
        ));
    } else if state.include_usage && chunk_usage.is_some() {
        // The backend's own finish_reason already went out on an
        // earlier chunk; this one carries only the trailing usage
        // payload (real OpenAI-shaped backends shape it this way).
        out.push(usage_only_chunk(&template, chunk_usage.unwrap()));
    }

    out
}

/// End-of-stream handling: one final pass over any remaining buffer,
/// then a trailing usage chunk if requested.
pub fn finish(
    state: &mut StreamProcessorState,
    known_tools: &HashSet<String>,
    provider: crate::types::Provider,
) -> Vec<GenericStreamChunk> {
    let mut out = Vec::new();
    let template = template_chunk(state, provider);

    if !state.tool_call_already_sent && !state.unified_buffer.is_empty() {
        out.extend(resolve_buffer(state, known_tools, &template));
    }

    if state.include_usage {
        if let (Some(p), Some(c)) = (state.prompt_tokens, state.completion_tokens) {
            let mut usage_chunk = template.clone();
            usage_chunk.usage = Some(crate::types::Usage {
                prompt_tokens: p,
                completion_tokens: c,
                total_tokens: p + c,
            });
            out.push(usage_chunk);
        }
    }

    state.closed = true;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenericStreamChoice, Provider};

    fn tools_set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn delta(text: &str) -> GenericStreamChunk {
        GenericStreamChunk {
            id: "x".into(),
            created: 0,
            model: "m".into(),
            provider: Provider::Ollama,
            choices: vec![GenericStreamChoice {
                index: 0,
                delta: GenericDelta {
                    role: None,
                    content: Some(text.to_string()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    #[test]
    fn plain_text_passes_through_untouched() {
        let mut state = StreamProcessorState::new("m", false);
        let known = tools_set(&["search"]);
        let out = advance(&mut state, &delta("hello there"), &known, DEFAULT_MAX_BUFFER_SIZE);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].choices[0].delta.content.as_deref(), Some("hello there"));
    }

    #[test]
    fn buffers_then_emits_tool_call_once_complete() {
        let mut state = StreamProcessorState::new("m", false);
        let known = tools_set(&["search"]);
        let out1 = advance(&mut state, &delta("<search><query>cats"), &known, DEFAULT_MAX_BUFFER_SIZE);
        assert!(out1.is_empty());
        let out2 = advance(&mut state, &delta("</query></search>"), &known, DEFAULT_MAX_BUFFER_SIZE);
        // Announce chunk (role + name, no arguments yet), then an
        // arguments chunk, then a bare finish_reason chunk.
        assert_eq!(out2.len(), 3);
        assert_eq!(out2[0].choices[0].delta.role, Some(Role::Assistant));
        assert_eq!(
            out2[0].choices[0].delta.tool_calls.as_ref().unwrap()[0].function.arguments,
            ""
        );
        assert_eq!(
            out2[1].choices[0].delta.tool_calls.as_ref().unwrap()[0].function.arguments,
            serde_json::json!({"query": "cats"}).to_string()
        );
        assert_eq!(out2[2].choices[0].finish_reason, Some(FinishReason::ToolCalls));
        assert!(state.tool_call_already_sent);
    }

    #[test]
    fn content_after_tool_call_is_suppressed() {
        let mut state = StreamProcessorState::new("m", false);
        let known = tools_set(&["search"]);
        advance(&mut state, &delta("<search><query>cats</query></search>"), &known, DEFAULT_MAX_BUFFER_SIZE);
        let out = advance(&mut state, &delta("some trailing prose"), &known, DEFAULT_MAX_BUFFER_SIZE);
        assert!(out.is_empty());
    }

    #[test]
    fn false_positive_classification_flushes_buffer() {
        let mut state = StreamProcessorState::new("m", false);
        let known = tools_set(&["search"]);
        advance(&mut state, &delta("OK <se"), &known, DEFAULT_MAX_BUFFER_SIZE);
        let out = advance(&mut state, &delta("nate debate"), &known, DEFAULT_MAX_BUFFER_SIZE);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].choices[0].delta.content.as_deref(), Some("OK <senate debate"));
    }

    #[test]
    fn oversized_buffer_is_tail_truncated_and_flushed() {
        let mut state = StreamProcessorState::new("m", false);
        let known = tools_set(&["search"]);
        advance(&mut state, &delta("<search>"), &known, 16);
        let out = advance(&mut state, &delta(&"x".repeat(64)), &known, 16);
        assert_eq!(out.len(), 1);
        assert!(out[0].choices[0].delta.content.as_ref().unwrap().len() <= TRUNCATE_TAIL);
    }

    #[test]
    fn finish_flushes_incomplete_buffer_as_content() {
        let mut state = StreamProcessorState::new("m", false);
        let known = tools_set(&["search"]);
        advance(&mut state, &delta("<sear"), &known, DEFAULT_MAX_BUFFER_SIZE);
        let out = finish(&mut state, &known, Provider::Ollama);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].choices[0].delta.content.as_deref(), Some("<sear"));
        assert!(state.closed);
    }

    fn usage_only(usage: crate::types::Usage) -> GenericStreamChunk {
        GenericStreamChunk {
            id: "x".into(),
            created: 0,
            model: "m".into(),
            provider: Provider::OpenAI,
            choices: vec![],
            usage: Some(usage),
        }
    }

    #[test]
    fn bare_usage_chunk_without_finish_reason_is_forwarded_when_requested() {
        let mut state = StreamProcessorState::new("m", true);
        let known = tools_set(&["search"]);
        advance(&mut state, &delta("hello"), &known, DEFAULT_MAX_BUFFER_SIZE);
        let usage = crate::types::Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        let out = advance(&mut state, &usage_only(usage), &known, DEFAULT_MAX_BUFFER_SIZE);
        assert_eq!(out.len(), 1);
        assert!(out[0].choices.is_empty());
        assert_eq!(out[0].usage, Some(usage));
        assert_eq!(state.prompt_tokens, Some(10));
        assert_eq!(state.completion_tokens, Some(5));
    }

    #[test]
    fn bare_usage_chunk_is_dropped_when_usage_not_requested() {
        let mut state = StreamProcessorState::new("m", false);
        let known = tools_set(&["search"]);
        let usage = crate::types::Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        let out = advance(&mut state, &usage_only(usage), &known, DEFAULT_MAX_BUFFER_SIZE);
        assert!(out.is_empty());
        // Still tracked internally even when not forwarded per-chunk, so
        // a later `finish()` usage chunk (if ever re-enabled) stays accurate.
        assert_eq!(state.prompt_tokens, Some(10));
    }
}
