//! End-to-end tests for the chat dispatcher, driving the real router
//! (via `axum-test`) against a mocked backend (via `wiremock`). Mirrors
//! the teacher's `ollama_integration_tests.rs` style: a mock server
//! stands in for the upstream LLM, and assertions are made on the
//! proxy's own HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use toolbridge::backend::BackendClient;
use toolbridge::types::Provider;
use toolbridge::utils::config::Config;
use toolbridge::{api, AppState};

fn base_config(backend_mode: Provider, backend_base_url: String, ollama_base_url: String) -> Config {
    Config {
        backend_mode,
        backend_llm_base_url: backend_base_url,
        backend_llm_chat_path: "/chat/completions".to_string(),
        backend_llm_api_key: None,
        ollama_base_url,
        proxy_host: "127.0.0.1".to_string(),
        proxy_port: 0,
        pass_tools: false,
        enable_tool_reinjection: true,
        tool_reinjection_message_count: 3,
        tool_reinjection_token_count: 1000,
        tool_reinjection_type: None,
        max_tool_iterations: 5,
        max_buffer_size: 1024 * 1024,
        connection_timeout_secs: 30,
        max_stream_buffer_size: 1024 * 1024,
        stream_connection_timeout_secs: 30,
        debug_mode: false,
    }
}

async fn test_server(config: Config) -> TestServer {
    let backend = BackendClient::new(Duration::from_secs(config.connection_timeout_secs)).unwrap();
    let state = AppState {
        config: Arc::new(config),
        backend: Arc::new(backend),
    };
    let app = api::routes::create_router().with_state(state);
    TestServer::new(app).expect("failed to start test server")
}

/// S1: OpenAI client, OpenAI backend, no tools, non-streaming — a pure
/// pass-through with field-for-field identical content.
#[tokio::test]
async fn openai_client_openai_backend_passthrough() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "a",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-x",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}]
        })))
        .mount(&mock_server)
        .await;

    let config = base_config(Provider::OpenAI, mock_server.uri(), mock_server.uri());
    let server = test_server(config).await;

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({"model": "gpt-x", "messages": [{"role": "user", "content": "hi"}]}))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "hello");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

/// S2: OpenAI client, Ollama backend, tools declared, model emits a
/// wrapped call — the proxy must synthesize the OpenAI tool_calls shape.
#[tokio::test]
async fn openai_client_ollama_backend_synthesizes_tool_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "created_at": "2026-01-01T00:00:00Z",
            "message": {
                "role": "assistant",
                "content": "<toolbridge:calls><get_weather><location>SF</location></get_weather></toolbridge:calls>"
            },
            "done": true,
            "done_reason": "stop"
        })))
        .mount(&mock_server)
        .await;

    let config = base_config(Provider::Ollama, mock_server.uri(), mock_server.uri());
    let server = test_server(config).await;

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "what's the weather in SF?"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "parameters": {"type": "object", "properties": {"location": {"type": "string"}}, "required": ["location"]}
                }
            }]
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let choice = &body["choices"][0];
    assert_eq!(choice["finish_reason"], "tool_calls");
    let call = &choice["message"]["tool_calls"][0];
    assert_eq!(call["function"]["name"], "get_weather");
    let args: serde_json::Value = serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(args["location"], "SF");
}

/// S4: capability filter — fields the Ollama-native target can't honor
/// never reach the backend.
#[tokio::test]
async fn capability_filter_strips_unsupported_fields_before_ollama_backend() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama3", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "created_at": "2026-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": "ok"},
            "done": true
        })))
        .mount(&mock_server)
        .await;

    let config = base_config(Provider::Ollama, mock_server.uri(), mock_server.uri());
    let server = test_server(config).await;

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "hi"}],
            "response_format": {"type": "json_object"},
            "seed": 42,
            "n": 2,
            "stream_options": {"include_usage": true}
        }))
        .await;

    response.assert_status_ok();

    let requests = mock_server.received_requests().await.unwrap();
    let sent_body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(sent_body.get("response_format").is_none());
    assert!(sent_body.get("n").is_none());
    assert!(
        sent_body
            .get("stream_options")
            .map(|v| v.is_null())
            .unwrap_or(true)
    );
}

/// S3-adjacent: streaming with a bare (unwrapped) tool element split
/// across the backend's NDJSON framing, rendered as OpenAI SSE.
#[tokio::test]
async fn streaming_ollama_backend_to_openai_client_emits_tool_call_sse() {
    let mock_server = MockServer::start().await;

    let ndjson = [
        json!({"model": "llama3", "created_at": "2026-01-01T00:00:00Z", "message": {"role": "assistant", "content": "OK "}, "done": false}),
        json!({"model": "llama3", "created_at": "2026-01-01T00:00:00Z", "message": {"role": "assistant", "content": "<get_weather><location>Paris</location></get_weather>"}, "done": false}),
        json!({"model": "llama3", "created_at": "2026-01-01T00:00:00Z", "message": {"role": "assistant", "content": ""}, "done": true, "done_reason": "stop"}),
    ]
    .iter()
    .map(|v| format!("{v}\n"))
    .collect::<String>();

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ndjson))
        .mount(&mock_server)
        .await;

    let config = base_config(Provider::Ollama, mock_server.uri(), mock_server.uri());
    let server = test_server(config).await;

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "weather?"}],
            "stream": true,
            "tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {"type": "object", "properties": {}}}}]
        }))
        .await;

    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("\"content\":\"OK \""));
    assert!(body.contains("\"finish_reason\":\"tool_calls\""));
    assert!(body.trim_end().ends_with("data: [DONE]"));
}

/// S6: re-injection happens once the conversation outgrows the
/// configured thresholds, and the reminder carries the marker the
/// parser's de-duplication scan looks for.
#[tokio::test]
async fn reinjection_adds_reminder_once_thresholds_are_exceeded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "created_at": "2026-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": "sure"},
            "done": true
        })))
        .mount(&mock_server)
        .await;

    let mut config = base_config(Provider::Ollama, mock_server.uri(), mock_server.uri());
    config.tool_reinjection_message_count = 1;
    let server = test_server(config).await;

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "llama3",
            "messages": [
                {"role": "user", "content": "turn one"},
                {"role": "assistant", "content": "reply one"},
                {"role": "user", "content": "turn two"},
                {"role": "assistant", "content": "reply two"},
                {"role": "user", "content": "turn three"},
                {"role": "assistant", "content": "reply three"},
                {"role": "user", "content": "turn four"}
            ],
            "tools": [{"type": "function", "function": {"name": "search", "parameters": {"type": "object", "properties": {}}}}]
        }))
        .await;

    response.assert_status_ok();

    let requests = mock_server.received_requests().await.unwrap();
    let sent_body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let messages = sent_body["messages"].as_array().unwrap();
    // First message is the injected system prompt; the reminder should
    // land as an additional message further down the conversation, far
    // enough from the original injection that the dedup lookback window
    // (the last 6 messages) no longer covers it.
    assert_eq!(messages[0]["role"], "system");
    let reminder = messages
        .iter()
        .skip(1)
        .find(|m| m["content"].as_str().unwrap_or_default().contains("TOOL USAGE INSTRUCTIONS"));
    assert!(reminder.is_some(), "expected a re-injected reminder further into the conversation");
    assert_eq!(reminder.unwrap()["role"], "system");
}
