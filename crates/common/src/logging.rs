//! Logging setup and configuration

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Where formatted log lines are written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogTarget {
    /// Standard error, with ANSI colors
    #[default]
    Stderr,
    /// Append to a file, without ANSI colors
    File(PathBuf),
}

/// Build the level filter, letting `RUST_LOG` override the configured level
pub fn build_filter(default_level: &str) -> crate::Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))
}

/// Setup tracing subscriber for the application
pub fn setup_logging(default_level: &str, target: &LogTarget) -> crate::Result<()> {
    let filter = build_filter(default_level)?;

    match target {
        LogTarget::Stderr => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        LogTarget::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_rejects_garbage() {
        // SAFETY: tests in this module do not read RUST_LOG concurrently
        unsafe {
            std::env::remove_var("RUST_LOG");
        }
        assert!(build_filter("info").is_ok());
        assert!(build_filter("headunit=debug,warn").is_ok());
        assert!(build_filter("=[").is_err());
    }

    #[test]
    fn test_default_target_is_stderr() {
        assert_eq!(LogTarget::default(), LogTarget::Stderr);
    }
}
