//! Provider-neutral intermediate representation and converters (4.D),
//! the translation engine (4.E), and the capability filter (4.I).

pub mod capabilities;
pub mod engine;
pub mod ollama;
pub mod openai;

pub use engine::{translate_request, translate_response, translate_stream_chunk};
