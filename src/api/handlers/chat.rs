//! The chat dispatcher (4.G): detect format, translate, send to the
//! backend, and return either a batch JSON body or a framed stream.

use std::collections::HashSet;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::Value;

use crate::backend::HeaderPolicy;
use crate::streaming::{OllamaNdjsonProcessor, OpenAiSseProcessor};
use crate::translate::engine::{translate_request, translate_response, TranslateOptions};
use crate::types::{Provider, ProxyError, Result};
use crate::utils::config::Config;
use crate::AppState;

/// `POST /v1/chat/completions`.
pub async fn openai_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response> {
    dispatch(state, Provider::OpenAI, headers, body).await
}

/// `POST /api/chat` and `POST /api/generate` (the latter's bare `prompt`
/// is wrapped into a single-message conversation by the Ollama
/// converter, per 4.D).
pub async fn ollama_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response> {
    dispatch(state, Provider::Ollama, headers, body).await
}

fn validate(client_format: Provider, body: &Value) -> Result<()> {
    match client_format {
        Provider::OpenAI => {
            let ok = body
                .get("messages")
                .and_then(Value::as_array)
                .map(|a| !a.is_empty())
                .unwrap_or(false);
            if !ok {
                return Err(ProxyError::ClientValidation(
                    "messages must be a non-empty array".to_string(),
                ));
            }
        }
        Provider::Ollama => {
            let has_prompt = body
                .get("prompt")
                .and_then(Value::as_str)
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            let has_messages = body
                .get("messages")
                .and_then(Value::as_array)
                .map(|a| !a.is_empty())
                .unwrap_or(false);
            if !has_prompt && !has_messages {
                return Err(ProxyError::ClientValidation(
                    "request must carry 'prompt' or a non-empty 'messages'".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// An explicit `Authorization: Bearer ollama` header forces the Ollama
/// backend regardless of `BACKEND_MODE` (4.G step 2).
fn resolve_backend_format(configured: Provider, headers: &HeaderMap) -> Provider {
    let forced_ollama = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("bearer ollama"))
        .unwrap_or(false);
    if forced_ollama {
        Provider::Ollama
    } else {
        configured
    }
}

fn wants_stream(client_format: Provider, body: &Value) -> bool {
    match body.get("stream").and_then(Value::as_bool) {
        Some(explicit) => explicit,
        // OpenAI streams only when asked; Ollama streams unless declined.
        None => client_format == Provider::Ollama,
    }
}

fn header_policy(config: &Config, headers: &HeaderMap) -> HeaderPolicy {
    HeaderPolicy {
        configured_api_key: config.backend_llm_api_key.clone(),
        client_authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

fn backend_url(config: &Config, target: Provider) -> String {
    match target {
        Provider::OpenAI => format!(
            "{}{}",
            config.backend_llm_base_url.trim_end_matches('/'),
            config.backend_llm_chat_path
        ),
        Provider::Ollama => format!("{}/api/chat", config.ollama_base_url.trim_end_matches('/')),
    }
}

fn translate_options(config: &Config) -> TranslateOptions {
    TranslateOptions {
        pass_tools: config.pass_tools,
        enable_reinjection: config.enable_tool_reinjection,
        reinjection_message_count: config.tool_reinjection_message_count,
        reinjection_token_count: config.tool_reinjection_token_count,
        reinjection_role_override: config.tool_reinjection_type,
    }
}

/// Requested model has no `/` and the backend (OpenAI-shaped) rejected it
/// as an unknown model id: plausibly a local Ollama tag (4.G step 6).
fn should_bounce_to_ollama(target: Provider, model: &str, err: &ProxyError) -> bool {
    if target != Provider::OpenAI || model.contains('/') {
        return false;
    }
    match err {
        ProxyError::BackendUpstream { body, .. } => body.contains("not a valid model id"),
        _ => false,
    }
}

async fn dispatch(state: AppState, client_format: Provider, headers: HeaderMap, body: Value) -> Result<Response> {
    validate(client_format, &body)?;

    let configured_target = resolve_backend_format(state.config.backend_mode, &headers);
    let stream = wants_stream(client_format, &body);
    let options = translate_options(&state.config);
    let policy = header_policy(&state.config, &headers);
    let model = body.get("model").and_then(Value::as_str).unwrap_or("").to_string();

    let translated = translate_request(&body, client_format, configured_target, options)?;

    if stream {
        return dispatch_streaming(state, client_format, configured_target, &translated.body, &policy, &headers, translated.known_tool_names, &model, &body, options).await;
    }

    let url = backend_url(&state.config, configured_target);
    match state.backend.post_json(&url, configured_target, &translated.body, &policy, &headers).await {
        Ok(raw) => {
            let out = translate_response(&raw, configured_target, client_format, &translated.known_tool_names)?;
            Ok(Json(out).into_response())
        }
        Err(e) if should_bounce_to_ollama(configured_target, &model, &e) => {
            tracing::warn!(model, "model id rejected by OpenAI-shaped backend, bouncing to Ollama");
            let bounced = translate_request(&body, client_format, Provider::Ollama, options)?;
            let ollama_url = backend_url(&state.config, Provider::Ollama);
            let raw = state
                .backend
                .post_json(&ollama_url, Provider::Ollama, &bounced.body, &policy, &headers)
                .await?;
            let out = translate_response(&raw, Provider::Ollama, client_format, &bounced.known_tool_names)?;
            Ok(Json(out).into_response())
        }
        Err(e) => Err(e),
    }
}

async fn dispatch_streaming(
    state: AppState,
    client_format: Provider,
    backend_format: Provider,
    body: &Value,
    policy: &HeaderPolicy,
    client_headers: &HeaderMap,
    known_tools: HashSet<String>,
    model_name: &str,
    original_body: &Value,
    options: TranslateOptions,
) -> Result<Response> {
    let url = backend_url(&state.config, backend_format);
    let (backend_format, body, known_tools, byte_stream) =
        match state.backend.post_json_stream(&url, backend_format, body, policy, client_headers).await {
            Ok(stream) => (backend_format, body.clone(), known_tools, stream),
            Err(e) if should_bounce_to_ollama(backend_format, model_name, &e) => {
                tracing::warn!(model = model_name, "model id rejected by OpenAI-shaped backend, bouncing to Ollama stream");
                let bounced = translate_request(original_body, client_format, Provider::Ollama, options)?;
                let ollama_url = backend_url(&state.config, Provider::Ollama);
                let stream = state
                    .backend
                    .post_json_stream(&ollama_url, Provider::Ollama, &bounced.body, policy, client_headers)
                    .await?;
                (Provider::Ollama, bounced.body, bounced.known_tool_names, stream)
            }
            Err(e) => return Err(e),
        };
    let body = &body;

    let model = body.get("model").and_then(Value::as_str).unwrap_or("").to_string();
    let include_usage = body
        .get("stream_options")
        .and_then(|o| o.get("include_usage"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let max_buffer_size = state.config.max_stream_buffer_size;

    let response_stream = async_stream::stream! {
        let mut backend_chunks = decode_backend_stream(backend_format, byte_stream);

        match client_format {
            Provider::OpenAI => {
                let mut processor = OpenAiSseProcessor::new(model, include_usage, known_tools, max_buffer_size, backend_format);
                while let Some(raw) = backend_chunks.next().await {
                    match raw {
                        Ok(raw) => {
                            for event in processor.process_backend_chunk(&raw).unwrap_or_default() {
                                yield Ok::<_, std::io::Error>(Bytes::from(event));
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "backend stream interrupted");
                            break;
                        }
                    }
                }
                for event in processor.finish() {
                    yield Ok(Bytes::from(event));
                }
            }
            Provider::Ollama => {
                let mut processor = OllamaNdjsonProcessor::new(model, include_usage, known_tools, max_buffer_size, backend_format);
                while let Some(raw) = backend_chunks.next().await {
                    match raw {
                        Ok(raw) => {
                            for line in processor.process_backend_chunk(&raw).unwrap_or_default() {
                                yield Ok::<_, std::io::Error>(Bytes::from(line));
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "backend stream interrupted");
                            break;
                        }
                    }
                }
                for line in processor.finish() {
                    yield Ok(Bytes::from(line));
                }
            }
        }
    };

    let content_type = match client_format {
        Provider::OpenAI => "text/event-stream",
        Provider::Ollama => "application/x-ndjson",
    };

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(response_stream))
        .map_err(|e| ProxyError::Internal(e.to_string()))?)
}

/// Decode the backend's wire framing into a stream of generic-shaped
/// JSON values, one per backend chunk: SSE events for an OpenAI-shaped
/// backend, NDJSON lines for an Ollama-shaped one.
fn decode_backend_stream(
    backend_format: Provider,
    byte_stream: impl futures::Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> std::pin::Pin<Box<dyn futures::Stream<Item = Result<Value>> + Send>> {
    match backend_format {
        Provider::OpenAI => {
            let events = byte_stream.eventsource();
            Box::pin(async_stream::stream! {
                futures::pin_mut!(events);
                while let Some(event) = events.next().await {
                    match event {
                        Ok(event) => {
                            if event.data == "[DONE]" {
                                break;
                            }
                            match serde_json::from_str::<Value>(&event.data) {
                                Ok(v) => yield Ok(v),
                                Err(e) => {
                                    yield Err(ProxyError::Internal(format!("malformed SSE payload: {e}")));
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            yield Err(ProxyError::BackendUnreachable(e.to_string()));
                            break;
                        }
                    }
                }
            })
        }
        Provider::Ollama => Box::pin(async_stream::stream! {
            futures::pin_mut!(byte_stream);
            let mut buf = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ProxyError::BackendUnreachable(e.to_string()));
                        break;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].to_string();
                    buf.drain(..=pos);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(line) {
                        Ok(v) => yield Ok(v),
                        Err(e) => {
                            yield Err(ProxyError::Internal(format!("malformed NDJSON line: {e}")));
                        }
                    }
                }
            }
            let tail = buf.trim();
            if !tail.is_empty() {
                if let Ok(v) = serde_json::from_str::<Value>(tail) {
                    yield Ok(v);
                }
            }
        }),
    }
}
