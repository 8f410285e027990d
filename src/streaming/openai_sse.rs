//! `OpenAISSEStreamProcessor`: renders the shared state machine's
//! generic chunks as OpenAI SSE events for an OpenAI-format client,
//! regardless of which provider the backend is.

use std::collections::HashSet;

use crate::translate::engine;
use crate::translate::openai::stream_chunk_from_generic;
use crate::types::{Provider, Result, StreamProcessorState};

/// Pumps backend chunks (in `backend_provider`'s wire shape) through the
/// tool-call state machine and renders OpenAI `data: ...\n\n` events.
pub struct OpenAiSseProcessor {
    state: StreamProcessorState,
    known_tools: HashSet<String>,
    max_buffer_size: usize,
    backend_provider: Provider,
}

impl OpenAiSseProcessor {
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

    /// Feed one raw backend chunk; returns zero or more SSE event strings.
    pub fn process_backend_chunk(&mut self, raw: &serde_json::Value) -> Result<Vec<String>> {
        if self.state.closed {
            return Ok(vec![]);
        }
        let generic = engine::stream_chunk_to_generic(raw, self.backend_provider)?;
        let chunks = super::advance(&mut self.state, &generic, &self.known_tools, self.max_buffer_size);
        Ok(chunks.iter().map(render).collect())
    }

    /// End of stream: final buffer resolution, optional usage event, and
    /// the terminal `data: [DONE]\n\n`.
    pub fn finish(&mut self) -> Vec<String> {
        let mut out: Vec<String> = super::finish(&mut self.state, &self.known_tools, Provider::OpenAI)
            .iter()
            .map(render)
            .collect();
        out.push("data: [DONE]\n\n".to_string());
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
    format!("data: {}\n\n", serde_json::to_string(&wire).unwrap_or_default())
}
