//! Command handlers.
//!
//! Each handler takes the parsed arguments plus the effective config and
//! writes its result to stdout. Diagnostics go through `tracing` to stderr.

pub mod config;
pub mod policy;
pub mod simulate;
