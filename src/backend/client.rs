//! Backend dispatch (4.H).
//!
//! Retry policy: up to 2 retries on network error or HTTP 5xx; on 429,
//! honor `Retry-After` up to 3.1 s; exponential backoff with a 500 ms
//! base and a 3.1 s cap.

use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::types::{Provider, ProxyError, Result};

const MAX_RETRIES: u32 = 2;
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_millis(3100);
const PASSTHROUGH_ALLOWLIST: &[&str] = &["openai-organization", "openai-project", "user-agent", "x-custom-header"];

/// Inputs to the header policy: what's configured vs. what the client sent.
#[derive(Debug, Clone, Default)]
pub struct HeaderPolicy {
    /// `BACKEND_LLM_API_KEY`, when set; takes priority over the client's
    /// own `Authorization` header.
    pub configured_api_key: Option<String>,
    /// The client's incoming `Authorization` header, passed through only
    /// when no canonical key is configured and the target is OpenAI-shaped.
    pub client_authorization: Option<String>,
}

fn build_headers(target: Provider, policy: &HeaderPolicy, client_headers: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(key) = &policy.configured_api_key {
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(AUTHORIZATION, v);
        }
    } else if target == Provider::OpenAI {
        if let Some(auth) = &policy.client_authorization {
            if let Ok(v) = HeaderValue::from_str(auth) {
                headers.insert(AUTHORIZATION, v);
            }
        }
    }

    headers.insert("http-referer", HeaderValue::from_static("https://github.com/toolbridge-proxy/toolbridge"));
    headers.insert("x-title", HeaderValue::from_static("toolbridge"));

    for name in PASSTHROUGH_ALLOWLIST {
        if let Some(value) = client_headers.get(*name) {
            if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
                headers.insert(header_name, value.clone());
            }
        }
    }

    headers
}

/// Thin wrapper over a `reqwest::Client` applying this crate's header and
/// retry policy uniformly across both backend formats.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    /// Per-request timeout override for `post_json_stream`, since a
    /// streamed response legitimately stays open far longer than a
    /// batch call's `connection_timeout` should allow.
    stream_timeout: Duration,
}

impl BackendClient {
    pub fn new(connection_timeout: Duration) -> Result<Self> {
        Self::with_stream_timeout(connection_timeout, connection_timeout)
    }

    /// Build a client whose streaming requests (`post_json_stream`) use
    /// `stream_timeout` instead of `connection_timeout`, matching
    /// `STREAM_CONNECTION_TIMEOUT`'s config surface (section 12).
    pub fn with_stream_timeout(connection_timeout: Duration, stream_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(connection_timeout)
            .build()
            .map_err(|e| ProxyError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, stream_timeout })
    }

    /// POST `body` to `url`, retrying per policy, and return the parsed
    /// JSON response.
    pub async fn post_json(
        &self,
        url: &str,
        target: Provider,
        body: &serde_json::Value,
        policy: &HeaderPolicy,
        client_headers: &HeaderMap,
    ) -> Result<serde_json::Value> {
        let headers = build_headers(target, policy, client_headers);
        let resp = self.send_with_retry(url, body, headers, None).await?;
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| ProxyError::BackendUpstream {
                status: 502,
                body: format!("non-JSON backend response: {e}"),
            })
    }

    /// POST `body` to `url` expecting a streamed body; retries only apply
    /// to establishing the connection and receiving headers. Uses
    /// `stream_timeout` rather than the client's default connection
    /// timeout for the whole request lifetime.
    pub async fn post_json_stream(
        &self,
        url: &str,
        target: Provider,
        body: &serde_json::Value,
        policy: &HeaderPolicy,
        client_headers: &HeaderMap,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>>> {
        let headers = build_headers(target, policy, client_headers);
        let resp = self
            .send_with_retry(url, body, headers, Some(self.stream_timeout))
            .await?;
        Ok(resp.bytes_stream())
    }

    /// Forward a request verbatim to `url`, for the generic pass-through
    /// endpoints (section 6: other `/v1/*` and `/api/*` paths). Out of
    /// core scope: single attempt, no retry policy, client headers
    /// forwarded as-is minus hop-by-hop ones the HTTP layer recomputes.
    pub async fn forward(
        &self,
        method: reqwest::Method,
        url: &str,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        headers.remove(reqwest::header::HOST);
        headers.remove(reqwest::header::CONTENT_LENGTH);
        self.http
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::BackendUnreachable(e.to_string()))
    }

    async fn send_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: HeaderMap,
        timeout_override: Option<Duration>,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let mut req = self.http.post(url).headers(headers.clone()).json(body);
            if let Some(timeout) = timeout_override {
                req = req.timeout(timeout);
            }
            let result = req.send().await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    if attempt >= MAX_RETRIES {
                        return Err(shape_rate_limit_error(resp).await);
                    }
                    let wait = retry_after(&resp).unwrap_or_else(|| backoff_for(attempt)).min(MAX_BACKOFF);
                    tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, "backend rate limited, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= MAX_RETRIES {
                        return Err(shape_upstream_error(resp).await);
                    }
                    let wait = backoff_for(attempt);
                    tracing::warn!(attempt, status = %resp.status(), wait_ms = wait.as_millis() as u64, "backend server error, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) => return Err(shape_upstream_error(resp).await),
                Err(e) => {
                    if attempt >= MAX_RETRIES || !(e.is_timeout() || e.is_connect() || e.is_request()) {
                        return Err(ProxyError::BackendUnreachable(e.to_string()));
                    }
                    let wait = backoff_for(attempt);
                    tracing::warn!(attempt, error = %e, wait_ms = wait.as_millis() as u64, "backend network error, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let scaled = BASE_BACKOFF.as_millis() as u64 * 2u64.saturating_pow(attempt);
    Duration::from_millis(scaled).min(MAX_BACKOFF)
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn shape_upstream_error(resp: reqwest::Response) -> ProxyError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    ProxyError::BackendUpstream {
        status,
        body: body.chars().take(2000).collect(),
    }
}

async fn shape_rate_limit_error(resp: reqwest::Response) -> ProxyError {
    let body = resp.text().await.unwrap_or_default();
    ProxyError::BackendRateLimited(body.chars().take(500).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for(0), Duration::from_millis(500));
        assert_eq!(backoff_for(1), Duration::from_millis(1000));
        assert_eq!(backoff_for(5), MAX_BACKOFF);
    }

    #[test]
    fn header_policy_prefers_configured_key_over_client_auth() {
        let policy = HeaderPolicy {
            configured_api_key: Some("server-key".to_string()),
            client_authorization: Some("Bearer client-key".to_string()),
        };
        let headers = build_headers(Provider::OpenAI, &policy, &HeaderMap::new());
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer server-key");
    }

    #[test]
    fn header_policy_falls_back_to_client_auth_for_openai() {
        let policy = HeaderPolicy {
            configured_api_key: None,
            client_authorization: Some("Bearer client-key".to_string()),
        };
        let headers = build_headers(Provider::OpenAI, &policy, &HeaderMap::new());
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer client-key");
    }

    #[test]
    fn client_auth_is_not_forwarded_to_ollama_target() {
        let policy = HeaderPolicy {
            configured_api_key: None,
            client_authorization: Some("Bearer client-key".to_string()),
        };
        let headers = build_headers(Provider::Ollama, &policy, &HeaderMap::new());
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn passthrough_allowlist_is_forwarded() {
        let mut client_headers = HeaderMap::new();
        client_headers.insert("x-custom-header", HeaderValue::from_static("abc"));
        client_headers.insert("x-not-allowed", HeaderValue::from_static("nope"));
        let headers = build_headers(Provider::OpenAI, &HeaderPolicy::default(), &client_headers);
        assert_eq!(headers.get("x-custom-header").unwrap(), "abc");
        assert!(headers.get("x-not-allowed").is_none());
    }
}
