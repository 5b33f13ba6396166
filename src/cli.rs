//! CLI arguments and subcommands for abstract-socket-proxy.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parses a level name as written in a config file (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "abstract-socket-proxy",
    about = "Prometheus proxy aggregating metrics served on local unix sockets",
    long_about = "Prometheus proxy aggregating metrics served on local unix sockets.\n\n\
                  Discovers listening sockets in the kernel's unix socket table that match a \
                  pattern, scrapes each of them over HTTP on every request, labels their samples \
                  with the pattern's named captures and serves the merged result.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides the config file, default: info)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Regex matched against socket addresses; named groups become labels
    #[arg(long)]
    pub pattern: Option<String>,

    /// Path served by the proxy and requested from every endpoint
    #[arg(long)]
    pub metrics_path: Option<String>,

    /// Timeout in seconds for scraping one endpoint
    #[arg(long)]
    pub scrape_timeout: Option<u64>,

    /// Unix socket table to discover endpoints from
    #[arg(long)]
    pub socket_table: Option<PathBuf>,

    /// Maximum number of endpoints scraped at once per request
    #[arg(long)]
    pub max_concurrent_scrapes: Option<usize>,

    /// Enable TLS/SSL for HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print version and build information
    Version,

    /// Run one discovery pass and print the matching endpoints
    Discover {
        /// Also scrape every endpoint and report the outcome
        #[arg(long)]
        scrape: bool,
    },

    /// Validate configuration and runtime requirements
    Check,

    /// Generate configuration files
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },
}
