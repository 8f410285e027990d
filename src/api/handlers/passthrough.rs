//! Generic pass-through proxying for the non-chat endpoints named in
//! section 6 (`/v1/models`, `/api/tags`, `/api/show`) and for anything
//! else under `/v1/*` or `/api/*`. Pure proxy, out of core scope: no
//! translation, just forwarded verbatim to whichever backend the path
//! prefix addresses.

use axum::body::Body;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::types::{ProxyError, Result};
use crate::utils::config::Config;
use crate::AppState;

/// `/v1/...` addresses the OpenAI-shaped backend, `/api/...` the Ollama
/// one; `BACKEND_LLM_BASE_URL` already includes any `/v1` prefix the
/// backend itself expects, so it is stripped from the forwarded path.
fn target_url(config: &Config, path_and_query: &str) -> Option<String> {
    if let Some(rest) = path_and_query.strip_prefix("/v1") {
        let rest = if rest.is_empty() { "/" } else { rest };
        Some(format!("{}{}", config.backend_llm_base_url.trim_end_matches('/'), rest))
    } else if path_and_query.starts_with("/api") {
        Some(format!("{}{}", config.ollama_base_url.trim_end_matches('/'), path_and_query))
    } else {
        None
    }
}

/// Catch-all for `/v1/{*rest}` and `/api/{*rest}`, including the named
/// `GET /v1/models`, `GET /api/tags`, and `POST /api/show` routes.
pub async fn generic(
    State(state): State<AppState>,
    method: Method,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let path_and_query = uri
        .0
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(uri.0.path());

    let url = target_url(&state.config, path_and_query)
        .ok_or_else(|| ProxyError::ClientValidation(format!("no backend route for {path_and_query}")))?;

    let upstream = state.backend.forward(method, &url, headers, body).await?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    response_headers.remove(axum::http::header::TRANSFER_ENCODING);
    response_headers.remove(axum::http::header::CONNECTION);

    let stream = upstream.bytes_stream();
    let mut response = Response::builder().status(status).body(Body::from_stream(stream)).map_err(|e| ProxyError::Internal(e.to_string()))?;
    *response.headers_mut() = response_headers;
    Ok(response.into_response())
}
