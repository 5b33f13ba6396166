//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::Config;

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let output = match output {
        Some(path) => path,
        None => PathBuf::from("abstract-socket-proxy.yaml"),
    };

    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
        ConfigFormat::Yaml => {
            let mut content = serde_yaml::to_string(&config)?;
            if commented {
                content = add_config_comments(content);
            }
            content
        }
    };

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Abstract Socket Proxy Configuration
# ===================================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 8090                   # HTTP port
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
#
# Discovery
# ---------
# pattern: null                # Required. Regex matched against socket addresses,
#                              # named groups become labels, e.g.
#                              # '@/run/vc/(?P<sandbox>[0-9a-f]+)/shim-monitor\.sock@'
# socket_table: /proc/net/unix # Unix socket table to read
#
# Scraping
# --------
# metrics_path: /metrics       # Path served here and requested from every socket
# scrape_timeout_secs: 3       # Timeout for one socket's scrape
# max_concurrent_scrapes: null # Cap on concurrent scrapes per request (null = unbounded)
#
# TLS/SSL Configuration
# ---------------------
# enable_tls: false            # Enable HTTPS (default: false)
# tls_cert_path: null          # Path to TLS certificate (PEM format)
# tls_key_path: null           # Path to TLS private key (PEM format)
"#;

    format!("{comments}\n{yaml}")
}
