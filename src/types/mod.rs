//! Core types shared across the translation engine, streaming processors,
//! and HTTP layer.
//!
//! This module contains:
//! - The provider tag ([`Provider`]) used for both client and backend format
//! - The generic intermediate representation ([`GenericRequest`],
//!   [`GenericResponse`], [`GenericStreamChunk`])
//! - Tool-calling types ([`Tool`], [`ToolCallItem`], [`ExtractedToolCall`])
//! - Streaming state ([`PartialToolCallState`], [`StreamProcessorState`])
//! - The crate-wide error type ([`ProxyError`])

use serde::{Deserialize, Serialize};

// ============= Provider tag =============

/// Wire shape of a client request or backend endpoint.
///
/// The set is closed: a tagged union with a statically-dispatched switch,
/// not an open-polymorphism registry (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI Chat Completions wire format.
    OpenAI,
    /// Ollama native chat/generate wire format.
    Ollama,
}

impl Provider {
    /// Human-readable name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "ollama" => Ok(Provider::Ollama),
            other => Err(ProxyError::Configuration(format!(
                "unknown provider '{other}', expected 'openai' or 'ollama'"
            ))),
        }
    }
}

// ============= Messages =============

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions to the model.
    System,
    /// Message from the user.
    User,
    /// Response from the assistant/model.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// A single message in the generic conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericMessage {
    /// Sender role.
    pub role: Role,
    /// Message text. Multimodal "parts" shapes collapse to their text
    /// content on ingestion; this proxy never re-emits non-text parts.
    #[serde(default)]
    pub content: String,
    /// Tool calls the assistant requested in this message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallItem>>,
    /// For `role: tool` messages, the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl GenericMessage {
    /// Construct a plain system/user/assistant message with no tool data.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

// ============= Tools =============

/// A tool (function) declared by the client.
///
/// Invariant: names are unique within a request and double as the XML
/// root tag the model is instructed to emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Identifier; must be a valid XML element local-name.
    pub name: String,
    /// Human-readable description shown in the injected instructions.
    #[serde(default)]
    pub description: Option<String>,
    /// JSON-schema-like parameter mapping.
    #[serde(default = "default_schema")]
    pub parameters_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// How the client wants tool selection handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides whether to call a tool.
    Auto,
    /// Tool calling disabled for this request.
    None,
    /// Model must call some tool.
    Required,
    /// Model must call this specific function.
    Function {
        /// Name of the required function.
        name: String,
    },
}

/// A tool call requested by the model, in generic/OpenAI shape
/// (`{id, type: "function", function: {name, arguments}}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallItem {
    /// Opaque identifier, generated by the proxy when synthesized from XML.
    pub id: String,
    /// Always `"function"` for the tools this proxy supports.
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    /// The invoked function.
    pub function: ToolCallFunction,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// The `function` field of a [`ToolCallItem`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Function name.
    pub name: String,
    /// Arguments encoded as a JSON string (OpenAI wire convention).
    pub arguments: String,
}

/// A tool call extracted from XML by the balanced-element parser (4.B),
/// before it is re-encoded as a [`ToolCallItem`] for the client's wire
/// format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedToolCall {
    /// The tool's name (the XML root tag's local name).
    pub name: String,
    /// Arguments as a JSON value: object for structured arguments, with
    /// leaves coerced to bool/number/string and repeated children
    /// collapsed into arrays.
    pub arguments: serde_json::Value,
}

// ============= Sampling / shape =============

/// Desired response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Plain text (default).
    Text,
    /// Constrained to a JSON object.
    JsonObject,
    /// Constrained to a named JSON schema.
    JsonSchema {
        /// The schema payload, passed through opaquely.
        #[serde(default)]
        json_schema: serde_json::Value,
    },
}

/// One or more stop sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    /// A single stop string.
    Single(String),
    /// Multiple stop strings.
    Many(Vec<String>),
}

impl StopSequences {
    /// Flatten into a vector regardless of the original shape.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::Single(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }
}

/// Streaming usage-reporting preference, mirrors OpenAI's
/// `stream_options.include_usage`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Whether the client asked for a final usage-bearing chunk.
    #[serde(default)]
    pub include_usage: bool,
}

// ============= Generic intermediate representation =============

/// Provider-neutral request, produced by `requestToGeneric` and consumed
/// by `requestFromGeneric` (4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericRequest {
    /// The client format this request originated from.
    pub provider: Provider,
    /// Model identifier, passed through verbatim.
    pub model: String,
    /// Ordered conversation.
    pub messages: Vec<GenericMessage>,

    /// Sampling parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,

    /// Tooling.
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    /// Shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,

    /// Provider-specific fields carried through opaquely, keyed by the
    /// source field name. Never interpreted by the engine itself.
    #[serde(default)]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Hit `max_tokens`.
    Length,
    /// Model requested one or more tool calls.
    ToolCalls,
    /// Content filtered.
    ContentFilter,
}

/// Token accounting, shared shape for responses and final stream chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated.
    pub completion_tokens: u32,
    /// Sum of the two.
    pub total_tokens: u32,
}

/// A single choice in a non-streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericChoice {
    /// Position in the `choices` array.
    pub index: u32,
    /// The full assistant message for this choice.
    pub message: GenericMessage,
    /// Why generation stopped, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Provider-neutral non-streaming response, produced by `responseToGeneric`
/// and consumed by `responseFromGeneric` (4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericResponse {
    /// Opaque response id.
    pub id: String,
    /// Unix timestamp of creation.
    pub created: i64,
    /// Model that produced the response.
    pub model: String,
    /// Which backend produced this (kept for diagnostics, not re-emitted).
    pub provider: Provider,
    /// One entry per requested completion.
    pub choices: Vec<GenericChoice>,
    /// Token accounting, when the backend reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Delta payload inside a streaming chunk's choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenericDelta {
    /// Present only on the first chunk of a choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Incremental text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Incremental (or complete, for synthesized calls) tool calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallItem>>,
}

/// A single choice in a streaming chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericStreamChoice {
    /// Position in the `choices` array.
    pub index: u32,
    /// The incremental payload.
    pub delta: GenericDelta,
    /// Set only on the terminal chunk for this choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Provider-neutral streaming chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericStreamChunk {
    /// Opaque response id, stable across a stream.
    pub id: String,
    /// Unix timestamp of creation.
    pub created: i64,
    /// Model that produced the response.
    pub model: String,
    /// Which backend produced this.
    pub provider: Provider,
    /// One entry per requested completion.
    pub choices: Vec<GenericStreamChoice>,
    /// Present only on the final usage-bearing chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

// ============= Streaming parser state =============

/// The streaming detector/parser's memory of whether the buffer is,
/// might become, or definitely is not a tool call.
///
/// Lifetime: one per active stream; reset whenever classification flips
/// to definitely-not or a complete tool call is emitted.
#[derive(Debug, Clone, Default)]
pub struct PartialToolCallState {
    /// Local name of the root element once a `<name` prefix is seen.
    pub root_tag: Option<String>,
    /// Buffer might still resolve into a tool call.
    pub might_be_tool_call: bool,
    /// The known tool name identified so far, once unambiguous.
    pub identified_tool_name: Option<String>,
    /// Raw text buffered while undecided. Tail-truncated on overflow.
    pub buffered_prefix: String,
}

impl PartialToolCallState {
    /// Drop all buffered state, returning to a fresh passthrough posture.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-request state for a streaming processor (4.F). One instance per
/// incoming chat request that streams; destroyed at stream end.
pub struct StreamProcessorState {
    /// Set once the downstream writer fails or the client disconnects.
    pub closed: bool,
    /// Text flushed as content so far (for diagnostics/tests only).
    pub content_buffer: String,
    /// The buffer shared by the detector/parser while undecided.
    pub unified_buffer: String,
    /// Tool-call detection/parsing state.
    pub partial: PartialToolCallState,
    /// At most one tool-call sequence is emitted per stream.
    pub tool_call_already_sent: bool,
    /// Model name, echoed into every emitted chunk.
    pub model: String,
    /// Whether the client asked for a trailing usage chunk.
    pub include_usage: bool,
    /// Running prompt token count, when the backend reports it mid-stream.
    pub prompt_tokens: Option<u32>,
    /// Running completion token count.
    pub completion_tokens: Option<u32>,
}

impl StreamProcessorState {
    /// Create fresh state for a new stream.
    pub fn new(model: impl Into<String>, include_usage: bool) -> Self {
        Self {
            closed: false,
            content_buffer: String::new(),
            unified_buffer: String::new(),
            partial: PartialToolCallState::default(),
            tool_call_already_sent: false,
            model: model.into(),
            include_usage,
            prompt_tokens: None,
            completion_tokens: None,
        }
    }
}

// ============= Errors =============

/// Crate-wide error type.
///
/// Maps onto the logical error kinds of the error-handling design:
/// client validation, backend failures (upstream/unreachable/rate
/// limited), and internal/configuration errors. Stream interruption is
/// represented as a plain `closed` flag on the processor rather than an
/// error, since it is never surfaced to the client.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Malformed or invalid client request; abort before any backend call.
    #[error("invalid request: {0}")]
    ClientValidation(String),

    /// Backend responded with a non-2xx status after retries were
    /// exhausted (or immediately, for non-retryable statuses).
    #[error("backend returned {status}: {body}")]
    BackendUpstream {
        /// The backend's HTTP status code.
        status: u16,
        /// Excerpt of the backend's response body.
        body: String,
    },

    /// Network failure or timeout reaching the backend.
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    /// Backend rate-limited us past the retry budget.
    #[error("backend rate limited: {0}")]
    BackendRateLimited(String),

    /// Configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Anything else; logged with detail, surfaced generically.
    #[error("internal error: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ProxyError::ClientValidation(_) => axum::http::StatusCode::BAD_REQUEST,
            ProxyError::BackendUpstream { status, .. } => {
                axum::http::StatusCode::from_u16(*status)
                    .unwrap_or(axum::http::StatusCode::BAD_GATEWAY)
            }
            ProxyError::BackendUnreachable(_) => axum::http::StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BackendRateLimited(_) => axum::http::StatusCode::TOO_MANY_REQUESTS,
            ProxyError::Configuration(_) | ProxyError::Internal(_) => {
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if !matches!(status, axum::http::StatusCode::BAD_REQUEST) {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_from_str_is_case_insensitive() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAI);
        assert_eq!("ollama".parse::<Provider>().unwrap(), Provider::Ollama);
        assert!("bedrock".parse::<Provider>().is_err());
    }

    #[test]
    fn stop_sequences_flatten() {
        assert_eq!(
            StopSequences::Single("\n".into()).into_vec(),
            vec!["\n".to_string()]
        );
        assert_eq!(
            StopSequences::Many(vec!["a".into(), "b".into()]).into_vec(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn partial_state_reset_clears_everything() {
        let mut p = PartialToolCallState {
            root_tag: Some("search".into()),
            might_be_tool_call: true,
            identified_tool_name: Some("search".into()),
            buffered_prefix: "<search>".into(),
        };
        p.reset();
        assert!(p.root_tag.is_none());
        assert!(!p.might_be_tool_call);
        assert!(p.buffered_prefix.is_empty());
    }
}
