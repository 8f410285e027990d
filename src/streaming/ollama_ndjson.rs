//! `OllamaLineJSONStreamProcessor`: renders the shared state machine's
//! generic chunks as Ollama NDJSON records for an Ollama-format client,
//! regardless of which provider the backend is.

use std::collections::HashSet;

use crate::translate::engine;
use crate::translate::ollama::stream_chunk_from_generic;
use crate::types::{Provider, Result, StreamProcessorState};

pub struct OllamaNdjsonProcessor {
    state: StreamProcessorState,
    known_tools: HashSet<String>,
    max_buffer_size: usize,
    backend_provider: Provider,
}

impl OllamaNdjsonProcessor {
    pub fn new(
        model: impl Into<String>,
        include_usage: bool,
        known_tools: HashSet<String>,
        max_buffer_size: usize,
        backend_provider: Provider,
    ) -> Self {
        Self {
            state: StreamProcessorState::new(model, include_usage),
            known_tools,
            max_buffer_size,
            backend_provider,
        }
    }

    /// Feed one raw backend chunk; returns zero or more NDJSON lines
    /// (each already `\n`-terminated).
    pub fn process_backend_chunk(&mut self, raw: &serde_json::Value) -> Result<Vec<String>> {
        if self.state.closed {
            return Ok(vec![]);
        }
        let generic = engine::stream_chunk_to_generic(raw, self.backend_provider)?;
        let chunks = super::advance(&mut self.state, &generic, &self.known_tools, self.max_buffer_size);
        Ok(merge_tool_call_with_finish(chunks).iter().map(render).collect())
    }

    /// End of stream: final buffer resolution, then the terminal
    /// `done:true` record (folded into the last emitted record, or a
    /// bare one if nothing else was pending).
    pub fn finish(&mut self) -> Vec<String> {
        let chunks = super::finish(&mut self.state, &self.known_tools, Provider::Ollama);
        let mut out: Vec<String> = merge_tool_call_with_finish(chunks).iter().map(render).collect();
        if out.is_empty() {
            let terminal = crate::translate::ollama::OllamaChatResponse {
                model: self.state.model.clone(),
                created_at: chrono::Utc::now().to_rfc3339(),
                message: crate::translate::ollama::OllamaMessage {
                    role: "assistant".to_string(),
                    content: String::new(),
                    tool_calls: None,
                },
                done: true,
                done_reason: Some("stop".to_string()),
                prompt_eval_count: self.state.prompt_tokens,
                eval_count: self.state.completion_tokens,
            };
            out.push(format!("{}\n", serde_json::to_string(&terminal).unwrap_or_default()));
        }
        out
    }

    pub fn mark_closed(&mut self) {
        self.state.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed
    }
}

fn render(chunk: &crate::types::GenericStreamChunk) -> String {
    let wire = stream_chunk_from_generic(chunk);
    format!("{}\n", serde_json::to_string(&wire).unwrap_or_default())
}

/// The shared state machine emits a synthesized tool call as two generic
/// chunks (an announce chunk, an arguments chunk, then a bare
/// `finish_reason` chunk) so the OpenAI SSE renderer can stream the
/// call's name before its arguments and close with a dedicated terminal
/// event. Ollama's NDJSON framing has no such multi-event convention:
/// one record carries `tool_calls` and `done` together. Fold the whole
/// run back into a single record before rendering.
fn merge_tool_call_with_finish(
    chunks: Vec<crate::types::GenericStreamChunk>,
) -> Vec<crate::types::GenericStreamChunk> {
    let mut out = Vec::with_capacity(chunks.len());
    let mut i = 0;
    while i < chunks.len() {
        let cur = &chunks[i];
        let cur_choice = cur.choices.first();
        let has_tool_calls = cur_choice.map(|c| c.delta.tool_calls.is_some()).unwrap_or(false);
        let cur_unfinished = cur_choice.and_then(|c| c.finish_reason).is_none();

        if has_tool_calls && cur_unfinished {
            // Consume the run of consecutive tool-call delta chunks,
            // keeping the most complete (last) `tool_calls` payload and
            // the earliest `role`.
            let mut j = i;
            let mut role = cur_choice.and_then(|c| c.delta.role);
            let mut latest_tool_calls = cur_choice.and_then(|c| c.delta.tool_calls.clone());
            while j + 1 < chunks.len() {
                let next_choice = chunks[j + 1].choices.first();
                let next_has_tool_calls = next_choice.map(|c| c.delta.tool_calls.is_some()).unwrap_or(false);
                let next_unfinished = next_choice.and_then(|c| c.finish_reason).is_none();
                if !next_has_tool_calls || !next_unfinished {
                    break;
                }
                role = role.or(next_choice.and_then(|c| c.delta.role));
                latest_tool_calls = next_choice.and_then(|c| c.delta.tool_calls.clone());
                j += 1;
            }

            if let Some(finish) = chunks.get(j + 1) {
                let finish_choice = finish.choices.first();
                let finish_reason = finish_choice.and_then(|c| c.finish_reason);
                let finish_is_bare = finish_choice
                    .map(|c| c.delta.content.is_none() && c.delta.tool_calls.is_none())
                    .unwrap_or(true);
                if finish_reason.is_some() && finish_is_bare {
                    let mut merged = cur.clone();
                    if let Some(choice) = merged.choices.first_mut() {
                        choice.delta.role = role;
                        choice.delta.tool_calls = latest_tool_calls;
                        choice.finish_reason = finish_reason;
                    }
                    merged.usage = finish.usage;
                    out.push(merged);
                    i = j + 2;
                    continue;
                }
            }
        }
        out.push(cur.clone());
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plain_content_as_ndjson_line() {
        let mut proc = OllamaNdjsonProcessor::new("llama3", false, HashSet::new(), super::super::DEFAULT_MAX_BUFFER_SIZE, Provider::OpenAI);
        let raw = serde_json::json!({
            "id": "1", "object": "chat.completion.chunk", "created": 0, "model": "llama3",
            "choices": [{"index": 0, "delta": {"content": "hi"}}]
        });
        let lines = proc.process_backend_chunk(&raw).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with('\n'));
        assert!(lines[0].contains("\"content\":\"hi\""));
    }

    #[test]
    fn finish_emits_terminal_done_record_when_nothing_pending() {
        let mut proc = OllamaNdjsonProcessor::new("llama3", false, HashSet::new(), super::super::DEFAULT_MAX_BUFFER_SIZE, Provider::OpenAI);
        let out = proc.finish();
        assert_eq!(out.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(out[0].trim_end()).unwrap();
        assert_eq!(parsed["done"], true);
    }

    #[test]
    fn emits_single_record_tool_call_sequence() {
        let known: HashSet<String> = ["search".to_string()].into_iter().collect();
        let mut proc = OllamaNdjsonProcessor::new("llama3", false, known, super::super::DEFAULT_MAX_BUFFER_SIZE, Provider::OpenAI);
        let raw = serde_json::json!({
            "id": "1", "object": "chat.completion.chunk", "created": 0, "model": "llama3",
            "choices": [{"index": 0, "delta": {"content": "<search><query>cats</query></search>"}}]
        });
        let lines = proc.process_backend_chunk(&raw).unwrap();
        assert_eq!(lines.len(), 1, "tool call + done must fold into one record");
        let parsed: serde_json::Value = serde_json::from_str(lines[0].trim_end()).unwrap();
        assert_eq!(parsed["done"], true);
        assert_eq!(parsed["message"]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(parsed["message"]["content"], "");
    }
}
