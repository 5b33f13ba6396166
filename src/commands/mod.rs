//! CLI command implementations for abstract-socket-proxy.
//!
//! This module provides implementations for all CLI subcommands:
//! - `version`: Version and build information
//! - `discover`: One-shot endpoint discovery
//! - `check`: Configuration and socket table validation
//! - `config`: Configuration file generation

pub mod check;
pub mod config;
pub mod discover;
pub mod version;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use discover::command_discover;
pub use version::{command_version, version_banner};
