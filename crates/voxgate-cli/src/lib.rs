//! Command-line front end for voxgate.
//!
//! `voxgate simulate` replays a JSON scenario against the coordinator with
//! scripted capture, playback and synthesis engines on a virtual clock.
//! `voxgate policy` and `voxgate config` print what the coordinator would
//! use on a given platform.

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

#[cfg(test)]
use tokio_test as _;

// Used by the binary only
use dotenvy as _;
use tracing_subscriber as _;

pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod scenario;

pub use commands::Commands;
pub use error::CliError;
pub use parser::Cli;
pub use scenario::{Scenario, Step};
