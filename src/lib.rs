//! # toolbridge
//!
//! A protocol-translating reverse proxy that sits between LLM clients
//! (speaking either the OpenAI Chat Completions wire format or the
//! Ollama native chat/generate format) and LLM backends (also OpenAI- or
//! Ollama-shaped). It makes any client talk to any backend and
//! synthesizes tool-calling on backends that don't support it natively,
//! by injecting XML-shaped tool-use instructions into the system prompt
//! and parsing XML tool invocations back out of the model's response.
//!
//! ## Core subsystems
//!
//! - [`tools`] — the tool-call detector (4.A), the XML balanced-element
//!   parser (4.B), and the instruction builder/re-injector (4.C).
//! - [`translate`] — the generic intermediate representation, the
//!   OpenAI/Ollama converters, the translation engine, and the
//!   capability filter (4.D/4.E/4.I).
//! - [`streaming`] — the shared tool-call-aware state machine and its
//!   two wire-format renderers (4.F).
//! - [`api`] — the HTTP layer: client-format detection, dispatch, and
//!   the streaming/batch response paths (4.G).
//! - [`backend`] — the HTTP client that talks to the configured backend,
//!   with retries and header policy (4.H).
//! - [`utils`] — configuration loading.
//! - [`cli`] — command-line flag parsing for the `toolbridge` binary.
//!
//! ## Usage
//!
//! Running `toolbridge` as a standalone server reads configuration from
//! the environment (optionally seeded from a TOML file) and serves the
//! endpoints described in spec section 6. As a library, the translation
//! engine and parser can be used directly without the HTTP layer.

#![warn(missing_docs)]

/// HTTP layer: client-format detection, the chat dispatcher (4.G), and
/// the generic pass-through routes.
pub mod api;
/// Backend HTTP client (4.H): retries, header policy, streaming.
pub mod backend;
/// Command-line flag parsing for the `toolbridge` binary.
pub mod cli;
/// Streaming processors (4.F): shared tool-call state machine plus the
/// OpenAI-SSE and Ollama-NDJSON renderers.
pub mod streaming;
/// XML-synthesized tool calling (4.A-4.C): detector, parser, instruction
/// builder/re-injector.
pub mod tools;
/// Provider-neutral IR, converters, translation engine, capability
/// filter (4.D/4.E/4.I).
pub mod translate;
/// Core shared types: the generic IR, tool-calling types, streaming
/// state, and the crate-wide error type.
pub mod types;
/// Configuration loading (section 12).
pub mod utils;

pub use types::{ProxyError, Result};

use std::sync::Arc;

/// Shared application state handed to every HTTP handler.
///
/// Built once at startup and cloned cheaply per request (an `Arc` pair);
/// both fields are read-only after construction, matching the
/// read-only-after-startup configuration snapshot in section 5.
#[derive(Clone)]
pub struct AppState {
    /// The resolved configuration snapshot.
    pub config: Arc<utils::config::Config>,
    /// The shared backend HTTP client.
    pub backend: Arc<backend::BackendClient>,
}
