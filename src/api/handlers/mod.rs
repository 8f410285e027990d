//! Request handlers for the chat dispatcher (4.G) and the generic
//! pass-through endpoints (section 6).

pub mod chat;
pub mod passthrough;
