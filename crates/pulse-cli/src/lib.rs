//! Pulse CLI library
//!
//! Configuration loading, argument parsing and the keep-alive demo engine
//! behind the `pulse` binary.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod keepalive;

pub use cli::{Cli, Commands};
pub use error::{CliError, Result};
pub use keepalive::KeepAliveEngine;
