//! Ollama native chat/generate wire format ↔ generic IR (4.D).
//!
//! Ollama's tool-call shape carries `arguments` as a JSON object rather
//! than the OpenAI-style JSON-encoded string, and timestamps are RFC3339
//! strings rather than unix seconds; both are normalized here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    FinishReason, GenericChoice, GenericDelta, GenericMessage, GenericRequest, GenericResponse,
    GenericStreamChoice, GenericStreamChunk, Provider, Role, ToolCallFunction, ToolCallItem, Tool,
    Usage,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaToolCall {
    pub function: OllamaFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl OllamaOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.top_p.is_none()
            && self.top_k.is_none()
            && self.num_predict.is_none()
            && self.repeat_penalty.is_none()
            && self.seed.is_none()
            && self.stop.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaFunctionDef {
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
pub struct OllamaTool {
    #[serde(rename = "type", default = "default_type")]
    pub tool_type: String,
    pub function: OllamaFunctionDef,
}

fn default_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaChatRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<OllamaMessage>,
    /// Accepted on ingestion as a `/api/generate`-style single prompt;
    /// wrapped into `messages` by `request_to_generic`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<serde_json::Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OllamaTool>>,
    #[serde(default, skip_serializing_if = "OllamaOptions::is_empty")]
    pub options: OllamaOptions,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaChatResponse {
    pub model: String,
    pub created_at: String,
    pub message: OllamaMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u32>,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn parse_created_at(s: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|_| chrono::Utc::now().timestamp())
}

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

fn tool_calls_to_generic(calls: Option<Vec<OllamaToolCall>>) -> Option<Vec<ToolCallItem>> {
    calls.map(|v| {
        v.into_iter()
            .map(|c| ToolCallItem {
                id: format!("call_{}", Uuid::new_v4().simple()),
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: c.function.name,
                    arguments: serde_json::to_string(&c.function.arguments)
                        .unwrap_or_else(|_| "{}".to_string()),
                },
            })
            .collect()
    })
}

fn tool_calls_from_generic(calls: &Option<Vec<ToolCallItem>>) -> Option<Vec<OllamaToolCall>> {
    calls.as_ref().map(|v| {
        v.iter()
            .map(|c| OllamaToolCall {
                function: OllamaFunctionCall {
                    name: c.function.name.clone(),
                    arguments: serde_json::from_str(&c.function.arguments)
                        .unwrap_or(serde_json::Value::Null),
                },
            })
            .collect()
    })
}

fn finish_reason_from_done(done: bool, done_reason: Option<&str>, has_tool_calls: bool) -> Option<FinishReason> {
    if !done {
        return None;
    }
    if has_tool_calls {
        return Some(FinishReason::ToolCalls);
    }
    match done_reason {
        Some("length") => Some(FinishReason::Length),
        _ => Some(FinishReason::Stop),
    }
}

// ============= request =============

pub fn request_to_generic(req: OllamaChatRequest) -> GenericRequest {
    let mut messages: Vec<GenericMessage> = req
        .messages
        .into_iter()
        .map(|m| GenericMessage {
            role: role_from_str(&m.role),
            content: m.content,
            tool_calls: tool_calls_to_generic(m.tool_calls),
            tool_call_id: None,
        })
        .collect();

    if messages.is_empty() {
        if let Some(prompt) = req.prompt {
            messages.push(GenericMessage::text(Role::User, prompt));
        }
    }

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

    let response_format = req.format.and_then(|f| match f {
        serde_json::Value::String(s) if s == "json" => {
            Some(crate::types::ResponseFormat::JsonObject)
        }
        serde_json::Value::Object(_) => Some(crate::types::ResponseFormat::JsonSchema {
            json_schema: f,
        }),
        _ => None,
    });

    GenericRequest {
        provider: Provider::Ollama,
        model: req.model,
        messages,
        max_tokens: req.options.num_predict,
        temperature: req.options.temperature,
        top_p: req.options.top_p,
        top_k: req.options.top_k,
        repetition_penalty: req.options.repeat_penalty,
        frequency_penalty: None,
        presence_penalty: None,
        seed: req.options.seed,
        stop: req.options.stop.map(crate::types::StopSequences::Many),
        tools,
        tool_choice: None,
        parallel_tool_calls: None,
        response_format,
        stream: req.stream,
        stream_options: None,
        n: None,
        extensions: req.extra,
    }
}

pub fn request_from_generic(req: &GenericRequest) -> OllamaChatRequest {
    let tools = if req.tools.is_empty() {
        None
    } else {
        Some(
            req.tools
                .iter()
                .map(|t| OllamaTool {
                    tool_type: "function".to_string(),
                    function: OllamaFunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters_schema.clone(),
                    },
                })
                .collect(),
        )
    };

    let format = req.response_format.as_ref().and_then(|rf| match rf {
        crate::types::ResponseFormat::JsonObject => Some(serde_json::json!("json")),
        crate::types::ResponseFormat::JsonSchema { json_schema } => Some(json_schema.clone()),
        crate::types::ResponseFormat::Text => None,
    });

    OllamaChatRequest {
        model: req.model.clone(),
        messages: req
            .messages
            .iter()
            .map(|m| OllamaMessage {
                role: role_to_str(m.role).to_string(),
                content: m.content.clone(),
                tool_calls: tool_calls_from_generic(&m.tool_calls),
            })
            .collect(),
        prompt: None,
        format,
        stream: req.stream,
        tools,
        options: OllamaOptions {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            num_predict: req.max_tokens,
            repeat_penalty: req.repetition_penalty,
            seed: req.seed,
            stop: req.stop.clone().map(|s| s.into_vec()),
        },
        extra: req.extensions.clone(),
    }
}

// ============= response =============

pub fn response_to_generic(resp: OllamaChatResponse) -> GenericResponse {
    let tool_calls = tool_calls_to_generic(resp.message.tool_calls.clone());
    let finish_reason = finish_reason_from_done(
        resp.done,
        resp.done_reason.as_deref(),
        tool_calls.is_some(),
    );
    let prompt_tokens = resp.prompt_eval_count.unwrap_or(0);
    let completion_tokens = resp.eval_count.unwrap_or(0);

    GenericResponse {
        id: format!("ollama-{}", Uuid::new_v4()),
        created: parse_created_at(&resp.created_at),
        model: resp.model,
        provider: Provider::Ollama,
        choices: vec![GenericChoice {
            index: 0,
            message: GenericMessage {
                role: role_from_str(&resp.message.role),
                content: resp.message.content,
                tool_calls,
                tool_call_id: None,
            },
            finish_reason,
        }],
        usage: if resp.prompt_eval_count.is_some() || resp.eval_count.is_some() {
            Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            })
        } else {
            None
        },
    }
}

pub fn response_from_generic(resp: &GenericResponse) -> OllamaChatResponse {
    let choice = resp
        .choices
        .first()
        .cloned()
        .unwrap_or_else(|| GenericChoice {
            index: 0,
            message: GenericMessage::text(Role::Assistant, String::new()),
            finish_reason: None,
        });

    let done_reason = match choice.finish_reason {
        Some(FinishReason::Length) => Some("length".to_string()),
        Some(_) => Some("stop".to_string()),
        None => None,
    };

    OllamaChatResponse {
        model: resp.model.clone(),
        created_at: now_rfc3339(),
        message: OllamaMessage {
            role: role_to_str(choice.message.role).to_string(),
            content: choice.message.content,
            tool_calls: tool_calls_from_generic(&choice.message.tool_calls),
        },
        done: true,
        done_reason,
        prompt_eval_count: resp.usage.map(|u| u.prompt_tokens),
        eval_count: resp.usage.map(|u| u.completion_tokens),
    }
}

// ============= stream chunk =============

pub fn stream_chunk_to_generic(chunk: OllamaChatResponse) -> GenericStreamChunk {
    let tool_calls = tool_calls_to_generic(chunk.message.tool_calls.clone());
    let finish_reason = finish_reason_from_done(
        chunk.done,
        chunk.done_reason.as_deref(),
        tool_calls.is_some(),
    );
    let prompt_tokens = chunk.prompt_eval_count.unwrap_or(0);
    let completion_tokens = chunk.eval_count.unwrap_or(0);

    GenericStreamChunk {
        id: format!("ollama-{}", Uuid::new_v4()),
        created: parse_created_at(&chunk.created_at),
        model: chunk.model,
        provider: Provider::Ollama,
        choices: vec![GenericStreamChoice {
            index: 0,
            delta: GenericDelta {
                role: if chunk.message.role.is_empty() {
                    None
                } else {
                    Some(role_from_str(&chunk.message.role))
                },
                content: if chunk.message.content.is_empty() {
                    None
                } else {
                    Some(chunk.message.content)
                },
                tool_calls,
            },
            finish_reason,
        }],
        usage: if chunk.done && (chunk.prompt_eval_count.is_some() || chunk.eval_count.is_some()) {
            Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            })
        } else {
            None
        },
    }
}

pub fn stream_chunk_from_generic(chunk: &GenericStreamChunk) -> OllamaChatResponse {
    let choice = chunk.choices.first();
    let done = choice.map(|c| c.finish_reason.is_some()).unwrap_or(false);
    let done_reason = choice.and_then(|c| match c.finish_reason {
        Some(FinishReason::Length) => Some("length".to_string()),
        Some(_) => Some("stop".to_string()),
        None => None,
    });

    OllamaChatResponse {
        model: chunk.model.clone(),
        created_at: now_rfc3339(),
        message: OllamaMessage {
            role: choice
                .and_then(|c| c.delta.role)
                .map(role_to_str)
                .unwrap_or("assistant")
                .to_string(),
            content: choice.and_then(|c| c.delta.content.clone()).unwrap_or_default(),
            tool_calls: choice.and_then(|c| tool_calls_from_generic(&c.delta.tool_calls)),
        },
        done,
        done_reason,
        prompt_eval_count: chunk.usage.map(|u| u.prompt_tokens),
        eval_count: chunk.usage.map(|u| u.completion_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_bare_prompt_into_single_user_message() {
        let req = OllamaChatRequest {
            model: "llama3".to_string(),
            prompt: Some("hello".to_string()),
            ..Default::default()
        };
        let generic = request_to_generic(req);
        assert_eq!(generic.messages.len(), 1);
        assert_eq!(generic.messages[0].role, Role::User);
        assert_eq!(generic.messages[0].content, "hello");
    }

    #[test]
    fn options_map_sampling_fields() {
        let req = OllamaChatRequest {
            model: "llama3".to_string(),
            options: OllamaOptions {
                temperature: Some(0.2),
                num_predict: Some(128),
                top_k: Some(40),
                ..Default::default()
            },
            ..Default::default()
        };
        let generic = request_to_generic(req);
        assert_eq!(generic.temperature, Some(0.2));
        assert_eq!(generic.max_tokens, Some(128));
        assert_eq!(generic.top_k, Some(40));
    }

    #[test]
    fn native_tool_calls_round_trip_arguments_as_object() {
        let resp = OllamaChatResponse {
            model: "llama3".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            message: OllamaMessage {
                role: "assistant".to_string(),
                content: String::new(),
                tool_calls: Some(vec![OllamaToolCall {
                    function: OllamaFunctionCall {
                        name: "search".to_string(),
                        arguments: serde_json::json!({"query": "cats"}),
                    },
                }]),
            },
            done: true,
            done_reason: Some("stop".to_string()),
            prompt_eval_count: Some(10),
            eval_count: Some(5),
        };
        let generic = response_to_generic(resp);
        let calls = generic.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "search");
        let parsed: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(parsed, serde_json::json!({"query": "cats"}));
        assert_eq!(generic.choices[0].finish_reason, Some(FinishReason::ToolCalls));

        let back = response_from_generic(&generic);
        assert_eq!(
            back.message.tool_calls.unwrap()[0].function.arguments,
            serde_json::json!({"query": "cats"})
        );
    }
}
