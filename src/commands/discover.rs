//! Discover command implementation.
//!
//! Runs one discovery pass against the socket table and prints the endpoints
//! the proxy would scrape, optionally scraping each of them once.

use std::sync::Arc;

use abstract_socket_proxy::discovery::{Discoverer, SocketNamespace};
use abstract_socket_proxy::scrape::{ScrapeCoordinator, ScrapeResult};
use abstract_socket_proxy::telemetry::ProxyMetrics;
use abstract_socket_proxy::transport::UnixSocketFetcher;

use crate::config::Config;

/// Prints the endpoints of one discovery pass.
pub async fn command_discover(config: &Config, scrape: bool) -> Result<(), Box<dyn std::error::Error>> {
    let discoverer = Discoverer::new(config.compiled_pattern()?, config.socket_table())?;

    println!("🔍 Discovering sockets in {}", discoverer.source().display());
    println!("   Pattern: {}", discoverer.pattern().as_str());

    let endpoints = discoverer.discover().await?;
    if endpoints.is_empty() {
        println!("\n⚠️  No sockets match the pattern");
        return Ok(());
    }

    let mut sorted: Vec<_> = endpoints.values().collect();
    sorted.sort_by(|a, b| a.identity.cmp(&b.identity));

    println!("\n📋 {} endpoints:", sorted.len());
    for endpoint in sorted {
        let namespace = match endpoint.namespace {
            SocketNamespace::Abstract => "abstract",
            SocketNamespace::Filesystem => "path",
        };
        println!("   {} ({})", endpoint.identity, namespace);
        for (name, value) in &endpoint.tags {
            println!("      {}=\"{}\"", name, value);
        }
    }

    if !scrape {
        return Ok(());
    }

    let coordinator = ScrapeCoordinator::new(
        Arc::new(UnixSocketFetcher),
        Arc::new(ProxyMetrics::new()?),
        config.scrape_settings(),
    );

    println!("\n📡 Scraping {}...", coordinator.settings().metrics_path);
    let mut results = coordinator.scrape_all(endpoints).await;
    results.sort_by(|a, b| identity(a).cmp(identity(b)));

    for result in &results {
        match result {
            ScrapeResult::Success { endpoint, families } => {
                let samples: usize = families.iter().map(|f| f.samples.len()).sum();
                println!(
                    "   ✅ {}: {} families, {} samples",
                    endpoint.identity,
                    families.len(),
                    samples
                );
            }
            ScrapeResult::Failure { endpoint, error } => {
                println!("   ❌ {}: {}", endpoint.identity, error);
            }
        }
    }

    let failed = results
        .iter()
        .filter(|r| matches!(r, ScrapeResult::Failure { .. }))
        .count();
    println!(
        "\n📋 Summary: {} scraped, {} failed",
        results.len() - failed,
        failed
    );
    Ok(())
}

fn identity(result: &ScrapeResult) -> &str {
    match result {
        ScrapeResult::Success { endpoint, .. } | ScrapeResult::Failure { endpoint, .. } => {
            &endpoint.identity
        }
    }
}
