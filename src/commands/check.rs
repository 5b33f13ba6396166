//! Check command implementation.
//!
//! Validates configuration and the socket table the proxy discovers from.

use std::fs;

use abstract_socket_proxy::discovery::parse_socket_table;

use crate::config::{validate_effective_config, Config};

/// Validates configuration and runtime requirements.
pub fn command_check(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Abstract Socket Proxy - System Check");
    println!("=======================================");

    let mut all_ok = true;

    // Check configuration
    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => {
            println!("   ✅ Configuration is valid");
        }
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    // Check the socket table
    let table_path = config.socket_table();
    println!("\n📁 Checking socket table {}...", table_path.display());
    match fs::read_to_string(&table_path) {
        Ok(table) => {
            println!("   ✅ Socket table readable ({} lines)", table.lines().count());

            if let Ok(Some(pattern)) = config.compiled_pattern() {
                let endpoints = parse_socket_table(&pattern, &table);
                if endpoints.is_empty() {
                    println!("   ⚠️  No sockets currently match the pattern");
                } else {
                    println!("   ✅ {} sockets match the pattern", endpoints.len());
                }
            }
        }
        Err(e) => {
            println!("   ❌ Cannot read socket table: {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - proxy is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}
