//! Version command implementation.

/// Returns the multi-line version banner.
pub fn version_banner() -> String {
    format!(
        "{name}\n    \
         Version:\t{version}\n    \
         Git commit:\t{commit}\n    \
         Built:\t\t{built}\n    \
         OS/Arch:\t{os}/{arch}",
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        commit = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown-commit"),
        built = option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
        os = std::env::consts::OS,
        arch = std::env::consts::ARCH,
    )
}

/// Prints the version banner.
pub fn command_version() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", version_banner());
    Ok(())
}
