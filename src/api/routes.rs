//! Router assembly: wires each wire endpoint (section 6) to its handler.

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers::{chat, passthrough};
use crate::AppState;

/// Build the full router. `health` is ambient (not named by section 6,
/// but present on every HTTP service in this codebase).
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(chat::openai_chat_completions))
        .route("/api/chat", post(chat::ollama_chat))
        .route("/api/generate", post(chat::ollama_chat))
        .route("/v1/models", get(passthrough::generic))
        .route("/api/tags", get(passthrough::generic))
        .route("/api/show", post(passthrough::generic))
        .route("/v1/{*rest}", axum::routing::any(passthrough::generic))
        .route("/api/{*rest}", axum::routing::any(passthrough::generic))
        .route("/health", get(health))
}

async fn health() -> &'static str {
    "OK"
}
