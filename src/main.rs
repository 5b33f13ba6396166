//! abstract-socket-proxy
//!
//! Prometheus metrics proxy for processes serving metrics on unix sockets.
//! This is the main entry point that initializes the server and handles subcommands.

mod cli;
mod commands;
mod config;

use abstract_socket_proxy::discovery::Discoverer;
use abstract_socket_proxy::handlers::router;
use abstract_socket_proxy::scrape::ScrapeCoordinator;
use abstract_socket_proxy::state::AppState;
use abstract_socket_proxy::telemetry::ProxyMetrics;
use abstract_socket_proxy::transport::UnixSocketFetcher;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info};
use tracing_subscriber::filter::LevelFilter;

use cli::{Args, Commands, LogLevel};
use commands::{command_check, command_config, command_discover, command_version, version_banner};
use config::{
    resolve_config, show_config, validate_effective_config, Config, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(config: &Config) {
    let level = config.log_level();
    let filter = match level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Resolves once SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        // Version and Config commands don't need config validation
        match command {
            Commands::Version => return command_version(),
            Commands::Config {
                output,
                format,
                commented,
            } => return command_config(output.clone(), format.clone(), *commented),
            Commands::Check => return command_check(&resolve_config(&args)?),
            Commands::Discover { .. } => {}
        }

        let config = load_validated_config(&args)?;
        setup_logging(&config);

        return match command {
            Commands::Discover { scrape } => command_discover(&config, *scrape).await,
            _ => unreachable!("handled above"),
        };
    }

    // Load configuration for main server mode
    let config = load_validated_config(&args)?;

    setup_logging(&config);

    for line in version_banner().lines() {
        info!("{}", line.trim());
    }

    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);

    // A missing pattern is refused here as well as by validation.
    let discoverer = Discoverer::new(config.compiled_pattern()?, config.socket_table())?;
    info!(
        "Discovering sockets in {} matching {}",
        discoverer.source().display(),
        discoverer.pattern().as_str()
    );

    let metrics = Arc::new(ProxyMetrics::new()?);
    debug!("Self metrics registered successfully");

    let settings = config.scrape_settings();
    info!(
        "Scraping {} on every endpoint with a {:?} timeout",
        settings.metrics_path, settings.timeout
    );
    if let Some(cap) = settings.max_concurrent {
        info!("At most {} endpoints are scraped concurrently", cap);
    }

    let coordinator =
        ScrapeCoordinator::new(Arc::new(UnixSocketFetcher), Arc::clone(&metrics), settings);

    let state = Arc::new(AppState::new(discoverer, coordinator, metrics));

    // Configure HTTP server routes
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;
    let app = router(state);

    // Check if TLS is enabled
    let enable_tls = config.enable_tls.unwrap_or(false);

    if enable_tls {
        // Both paths are present once validate_effective_config() has passed
        let (Some(cert_path), Some(key_path)) =
            (config.tls_cert_path.as_ref(), config.tls_key_path.as_ref())
        else {
            return Err("TLS is enabled but certificate or key path is missing".into());
        };

        info!("Loading TLS certificate from: {}", cert_path);
        info!("Loading TLS private key from: {}", key_path);

        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| {
                error!("Failed to load TLS configuration: {}", e);
                e
            })?;

        info!(
            "abstract-socket-proxy listening on https://{}:{}",
            bind_ip_str, port
        );

        let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, exiting...");
            }
        }
    } else {
        // TLS is disabled - use standard TCP listener
        let listener = TcpListener::bind(addr).await?;
        info!(
            "abstract-socket-proxy listening on http://{}:{}",
            bind_ip_str, port
        );

        let server = axum::serve(listener, app);

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, exiting...");
            }
        }
    }

    info!("abstract-socket-proxy stopped gracefully");
    Ok(())
}
