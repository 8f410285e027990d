//! OpenAI Chat Completions wire format ↔ generic IR (4.D).
//!
//! These are pure, allocation-only conversions. Wire structs mirror the
//! OpenAI shape closely enough to round-trip fields the generic IR
//! doesn't model explicitly (carried in `extensions`/`extra`).

use serde::{Deserialize, Serialize};

use crate::types::{
    FinishReason, GenericChoice, GenericDelta, GenericMessage, GenericRequest, GenericResponse,
    GenericStreamChoice, GenericStreamChunk, Provider, ResponseFormat, Role, StopSequences,
    StreamOptions, Tool, ToolCallFunction, ToolCallItem, ToolChoice, Usage,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_params")]
    pub parameters: serde_json::Value,
}

fn default_params() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type", default = "default_type")]
    pub tool_type: String,
    pub function: OpenAiFunctionDef,
}

fn default_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChoice {
    pub index: u32,
    pub message: OpenAiMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatResponse {
    pub id: String,
    #[serde(default = "default_object")]
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAiChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
}

fn default_object() -> String {
    "chat.completion".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallItem>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiStreamChoice {
    pub index: u32,
    pub delta: OpenAiDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChunk {
    pub id: String,
    #[serde(default = "default_chunk_object")]
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAiStreamChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
}

fn default_chunk_object() -> String {
    "chat.completion.chunk".to_string()
}

// ============= role <-> string =============

fn role_from_str(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

fn role_to_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn finish_reason_from_str(s: &str) -> FinishReason {
    match s {
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn finish_reason_to_str(f: FinishReason) -> &'static str {
    match f {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
    }
}

// ============= request =============

pub fn request_to_generic(req: OpenAiChatRequest) -> GenericRequest {
    let tools = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|t| Tool {
            name: t.function.name,
            description: t.function.description,
            parameters_schema: t.function.parameters,
        })
        .collect();

    let tool_choice = req.tool_choice.and_then(|v| match v {
        serde_json::Value::String(s) if s == "auto" => Some(ToolChoice::Auto),
        serde_json::Value::String(s) if s == "none" => Some(ToolChoice::None),
        serde_json::Value::String(s) if s == "required" => Some(ToolChoice::Required),
        serde_json::Value::Object(obj) => obj
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(|n| n.as_str())
            .map(|name| ToolChoice::Function {
                name: name.to_string(),
            }),
        _ => None,
    });

    let response_format = req.response_format.and_then(|v| {
        let kind = v.get("type").and_then(|t| t.as_str()).unwrap_or("text");
        match kind {
            "json_object" => Some(ResponseFormat::JsonObject),
            "json_schema" => Some(ResponseFormat::JsonSchema {
                json_schema: v.get("json_schema").cloned().unwrap_or_default(),
            }),
            _ => None,
        }
    });

    GenericRequest {
        provider: Provider::OpenAI,
        model: req.model,
        messages: req
            .messages
            .into_iter()
            .map(|m| GenericMessage {
                role: role_from_str(&m.role),
                content: m.content.unwrap_or_default(),
                tool_calls: m.tool_calls,
                tool_call_id: m.tool_call_id,
            })
            .collect(),
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        repetition_penalty: None,
        frequency_penalty: req.frequency_penalty,
        presence_penalty: req.presence_penalty,
        seed: req.seed,
        stop: req.stop,
        tools,
        tool_choice,
        parallel_tool_calls: req.parallel_tool_calls,
        response_format,
        stream: req.stream,
        stream_options: req.stream_options,
        n: req.n,
        extensions: req.extra,
    }
}

pub fn request_from_generic(req: &GenericRequest) -> OpenAiChatRequest {
    let tools = if req.tools.is_empty() {
        None
    } else {
        Some(
            req.tools
                .iter()
                .map(|t| OpenAiTool {
                    tool_type: "function".to_string(),
                    function: OpenAiFunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters_schema.clone(),
                    },
                })
                .collect(),
        )
    };

    let tool_choice = req.tool_choice.as_ref().map(|tc| match tc {
        ToolChoice::Auto => serde_json::json!("auto"),
        ToolChoice::None => serde_json::json!("none"),
        ToolChoice::Required => serde_json::json!("required"),
        ToolChoice::Function { name } => {
            serde_json::json!({"type": "function", "function": {"name": name}})
        }
    });

    let response_format = req.response_format.as_ref().map(|rf| match rf {
        ResponseFormat::Text => serde_json::json!({"type": "text"}),
        ResponseFormat::JsonObject => serde_json::json!({"type": "json_object"}),
        ResponseFormat::JsonSchema { json_schema } => {
            serde_json::json!({"type": "json_schema", "json_schema": json_schema})
        }
    });

    OpenAiChatRequest {
        model: req.model.clone(),
        messages: req
            .messages
            .iter()
            .map(|m| OpenAiMessage {
                role: role_to_str(m.role).to_string(),
                content: Some(m.content.clone()),
                tool_calls: m.tool_calls.clone(),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect(),
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        frequency_penalty: req.frequency_penalty,
        presence_penalty: req.presence_penalty,
        seed: req.seed,
        stop: req.stop.clone(),
        tools,
        tool_choice,
        parallel_tool_calls: req.parallel_tool_calls,
        response_format,
        stream: req.stream,
        stream_options: req.stream_options,
        n: req.n,
        extra: req.extensions.clone(),
    }
}

// ============= response =============

pub fn response_to_generic(resp: OpenAiChatResponse) -> GenericResponse {
    GenericResponse {
        id: resp.id,
        created: resp.created,
        model: resp.model,
        provider: Provider::OpenAI,
        choices: resp
            .choices
            .into_iter()
            .map(|c| GenericChoice {
                index: c.index,
                message: GenericMessage {
                    role: role_from_str(&c.message.role),
                    content: c.message.content.unwrap_or_default(),
                    tool_calls: c.message.tool_calls,
                    tool_call_id: c.message.tool_call_id,
                },
                finish_reason: c.finish_reason.as_deref().map(finish_reason_from_str),
            })
            .collect(),
        usage: resp.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

pub fn response_from_generic(resp: &GenericResponse) -> OpenAiChatResponse {
    OpenAiChatResponse {
        id: resp.id.clone(),
        object: default_object(),
        created: resp.created,
        model: resp.model.clone(),
        choices: resp
            .choices
            .iter()
            .map(|c| OpenAiChoice {
                index: c.index,
                message: OpenAiMessage {
                    role: role_to_str(c.message.role).to_string(),
                    content: Some(c.message.content.clone()),
                    tool_calls: c.message.tool_calls.clone(),
                    tool_call_id: c.message.tool_call_id.clone(),
                },
                finish_reason: c.finish_reason.map(|f| finish_reason_to_str(f).to_string()),
            })
            .collect(),
        usage: resp.usage.map(|u| OpenAiUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

// ============= stream chunk =============

pub fn stream_chunk_to_generic(chunk: OpenAiChunk) -> GenericStreamChunk {
    GenericStreamChunk {
        id: chunk.id,
        created: chunk.created,
        model: chunk.model,
        provider: Provider::OpenAI,
        choices: chunk
            .choices
            .into_iter()
            .map(|c| GenericStreamChoice {
                index: c.index,
                delta: GenericDelta {
                    role: c.delta.role.as_deref().map(role_from_str),
                    content: c.delta.content,
                    tool_calls: c.delta.tool_calls,
                },
                finish_reason: c.finish_reason.as_deref().map(finish_reason_from_str),
            })
            .collect(),
        usage: chunk.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

pub fn stream_chunk_from_generic(chunk: &GenericStreamChunk) -> OpenAiChunk {
    OpenAiChunk {
        id: chunk.id.clone(),
        object: default_chunk_object(),
        created: chunk.created,
        model: chunk.model.clone(),
        choices: chunk
            .choices
            .iter()
            .map(|c| OpenAiStreamChoice {
                index: c.index,
                delta: OpenAiDelta {
                    role: c.delta.role.map(|r| role_to_str(r).to_string()),
                    content: c.delta.content.clone(),
                    tool_calls: c.delta.tool_calls.clone(),
                },
                finish_reason: c.finish_reason.map(|f| finish_reason_to_str(f).to_string()),
            })
            .collect(),
        usage: chunk.usage.map(|u| OpenAiUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}
