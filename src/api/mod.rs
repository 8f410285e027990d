//! HTTP layer (4.G, section 6): the chat dispatcher and the generic
//! pass-through routes.
//!
//! # Endpoints
//!
//! - `POST /v1/chat/completions` — OpenAI chat completions.
//! - `POST /api/chat`, `POST /api/generate` — Ollama native chat.
//! - `GET /v1/models`, `GET /api/tags`, `POST /api/show`, and any other
//!   `/v1/*` or `/api/*` path — forwarded verbatim to the matching
//!   backend, untranslated.

/// Request handlers: the chat dispatcher and the pass-through proxy.
pub mod handlers;
/// Router assembly.
pub mod routes;
