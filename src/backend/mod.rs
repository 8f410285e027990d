//! The backend HTTP client (4.H): POSTs translated requests to whichever
//! provider the request targets, with the header and retry policy spec'd
//! for aggregator-friendly behavior.

pub mod client;

pub use client::{BackendClient, HeaderPolicy};
