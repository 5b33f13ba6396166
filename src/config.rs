//! Configuration management for abstract-socket-proxy.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use crate::cli::{Args, ConfigFormat, LogLevel};
use abstract_socket_proxy::discovery::DEFAULT_SOCKET_TABLE;
use abstract_socket_proxy::handlers::validate_route_path;
use abstract_socket_proxy::scrape::{ScrapeSettings, DEFAULT_METRICS_PATH};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8090;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 3;

/// Proxy configuration. Unset fields fall back to the defaults at use time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,

    // Discovery
    /// Regex matched against socket table addresses
    pub pattern: Option<String>,
    #[serde(alias = "socket-table")]
    pub socket_table: Option<PathBuf>,

    // Scraping
    #[serde(alias = "metrics-path")]
    pub metrics_path: Option<String>,
    #[serde(alias = "scrape-timeout-secs")]
    pub scrape_timeout_secs: Option<u64>,
    #[serde(alias = "max-concurrent-scrapes")]
    pub max_concurrent_scrapes: Option<usize>,

    // TLS/SSL Configuration
    #[serde(alias = "enable-tls")]
    pub enable_tls: Option<bool>,
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            log_level: Some(DEFAULT_LOG_LEVEL.into()),
            pattern: None,
            socket_table: Some(PathBuf::from(DEFAULT_SOCKET_TABLE)),
            metrics_path: Some(DEFAULT_METRICS_PATH.to_string()),
            scrape_timeout_secs: Some(DEFAULT_SCRAPE_TIMEOUT_SECS),
            max_concurrent_scrapes: None,
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl Config {
    /// Effective log level; an unparseable name is rejected by validation.
    pub fn log_level(&self) -> LogLevel {
        self.log_level
            .as_deref()
            .and_then(LogLevel::parse)
            .unwrap_or(LogLevel::Info)
    }

    pub fn socket_table(&self) -> PathBuf {
        self.socket_table
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_TABLE))
    }

    /// Compiles the discovery pattern. `Ok(None)` when no pattern is set.
    pub fn compiled_pattern(&self) -> Result<Option<Regex>, regex::Error> {
        self.pattern.as_deref().map(Regex::new).transpose()
    }

    pub fn scrape_settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            metrics_path: self
                .metrics_path
                .clone()
                .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_string()),
            timeout: Duration::from_secs(
                self.scrape_timeout_secs
                    .unwrap_or(DEFAULT_SCRAPE_TIMEOUT_SECS),
            ),
            max_concurrent: self.max_concurrent_scrapes,
        }
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    match cfg.pattern.as_deref() {
        None | Some("") => {
            return Err("pattern is not set; pass --pattern or set it in the config file".into());
        }
        Some(pattern) => {
            if let Err(e) = Regex::new(pattern) {
                return Err(format!("Invalid pattern '{}': {}", pattern, e).into());
            }
        }
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if LogLevel::parse(level).is_none() {
            return Err(format!(
                "Invalid log_level '{}', expected one of off/error/warn/info/debug/trace",
                level
            )
            .into());
        }
    }

    if let Some(path) = cfg.metrics_path.as_deref() {
        validate_route_path(path)?;
    }

    if cfg.scrape_timeout_secs == Some(0) {
        return Err("scrape_timeout_secs must be greater than 0".into());
    }

    if cfg.max_concurrent_scrapes == Some(0) {
        return Err("max_concurrent_scrapes must be greater than 0 when set".into());
    }

    if let Some(bind) = cfg.bind.as_deref() {
        if bind.parse::<std::net::IpAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", bind).into());
        }
    }

    // TLS validation
    if cfg.enable_tls.unwrap_or(false) {
        let cert_path = cfg.tls_cert_path.as_deref();
        let key_path = cfg.tls_key_path.as_deref();

        match (cert_path, key_path) {
            (None, None) => {
                return Err(
                    "TLS is enabled but neither tls_cert_path nor tls_key_path are set".into(),
                );
            }
            (Some(_), None) => {
                return Err("TLS is enabled but tls_key_path is not set".into());
            }
            (None, Some(_)) => {
                return Err("TLS is enabled but tls_cert_path is not set".into());
            }
            (Some(cert), Some(key)) => {
                check_pem_file(cert, "certificate")?;
                check_pem_file(key, "private key")?;
            }
        }
    }

    Ok(())
}

/// Checks that a TLS file exists, is readable and not empty.
fn check_pem_file(path: &str, what: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        return Err(format!("TLS {} file not found: {}", what, path).into());
    }

    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => Err(format!("TLS {} file is empty: {}", what, path).into()),
        Err(e) => Err(format!("TLS {} file is not readable: {} ({})", what, path, e).into()),
        Ok(_) => Ok(()),
    }
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref().and_then(|p| p.to_str()))?
    };

    // Override with CLI args
    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }

    // Only override port if the user supplied it on the CLI.
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }

    if let Some(level) = args.log_level {
        config.log_level = Some(format!("{:?}", level).to_lowercase());
    }

    // Discovery and scraping
    if let Some(pattern) = &args.pattern {
        config.pattern = Some(pattern.clone());
    }
    if let Some(table) = &args.socket_table {
        config.socket_table = Some(table.clone());
    }
    if let Some(path) = &args.metrics_path {
        config.metrics_path = Some(path.clone());
    }
    if let Some(timeout) = args.scrape_timeout {
        config.scrape_timeout_secs = Some(timeout);
    }
    if let Some(cap) = args.max_concurrent_scrapes {
        config.max_concurrent_scrapes = Some(cap);
    }

    // TLS configuration: CLI wins if provided
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert_path) = &args.tls_cert {
        config.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = &args.tls_key {
        config.tls_key_path = Some(key_path.to_string_lossy().to_string());
    }

    Ok(config)
}

/// Enhanced configuration loading with multiple format support
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        // Try default locations
        let defaults = [
            "/etc/abstract-socket-proxy/config.yaml",
            "/etc/abstract-socket-proxy/config.yml",
            "/etc/abstract-socket-proxy/config.json",
            "./abstract-socket-proxy.yaml",
            "./abstract-socket-proxy.yml",
            "./abstract-socket-proxy.json",
        ];

        defaults
            .iter()
            .find(|p| Path::new(p).exists())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(""))
    };

    if !path.exists() || path.to_string_lossy().is_empty() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            // Default to YAML
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };

    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            pattern: Some(r"@/run/vc/(?P<sandbox>[0-9a-f]+)/shim-monitor\.sock@".into()),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config_needs_pattern() {
        let err = validate_effective_config(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("pattern is not set"));
        assert!(validate_effective_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            Config {
                pattern: Some("(unclosed".into()),
                ..valid_config()
            },
            Config {
                metrics_path: Some("metrics".into()),
                ..valid_config()
            },
            Config {
                metrics_path: Some("/:metrics".into()),
                ..valid_config()
            },
            Config {
                metrics_path: Some("/{metrics}".into()),
                ..valid_config()
            },
            Config {
                scrape_timeout_secs: Some(0),
                ..valid_config()
            },
            Config {
                max_concurrent_scrapes: Some(0),
                ..valid_config()
            },
            Config {
                log_level: Some("loud".into()),
                ..valid_config()
            },
            Config {
                enable_tls: Some(true),
                ..valid_config()
            },
        ];

        for cfg in cases {
            assert!(validate_effective_config(&cfg).is_err(), "{:?}", cfg);
        }
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "pattern: 'from-file'\nport: 9000\nscrape_timeout_secs: 10\nlog_level: debug"
        )
        .unwrap();

        let config_path = file.path().to_str().unwrap().to_string();
        let args = Args::try_parse_from([
            "abstract-socket-proxy",
            "--config",
            &config_path,
            "--pattern",
            "from-cli",
            "--log-level",
            "warn",
        ])
        .unwrap();

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.pattern.as_deref(), Some("from-cli"));
        assert_eq!(config.port, Some(9000));
        assert_eq!(config.log_level(), LogLevel::Warn);

        let settings = config.scrape_settings();
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.metrics_path, DEFAULT_METRICS_PATH);
        assert_eq!(settings.max_concurrent, None);
    }

    #[test]
    fn test_load_json_with_dashed_keys() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"pattern": "shim", "socket-table": "/tmp/unix", "max-concurrent-scrapes": 4}}"#
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.socket_table(), PathBuf::from("/tmp/unix"));
        assert_eq!(config.max_concurrent_scrapes, Some(4));
        // Fields missing from the file resolve to defaults at use time.
        assert_eq!(config.scrape_settings().timeout, Duration::from_secs(3));
    }
}
