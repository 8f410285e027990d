//! Configuration loading (section 12).

pub mod config;
