//! Logging configuration and initialization
//!
//! Console logging by default, or daily rotating file logging when
//! `LOG_DESTINATION=file` is set. The filter comes from `RUST_LOG` with an
//! `info` fallback.

use anyhow::Result;
use std::env;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with a configurable output destination.
///
/// ## Environment variables
///
/// - `LOG_DESTINATION`: "console" (default) or "file"
/// - `LOG_DIR`: directory for log files (default: "./logs")
/// - `LOG_FILE_PREFIX`: prefix for log file names (default: "tipline")
pub fn init_logging() -> Result<()> {
    let destination = env::var("LOG_DESTINATION").unwrap_or_else(|_| "console".to_string());

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    match destination.to_lowercase().as_str() {
        "file" => {
            let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
            let prefix = env::var("LOG_FILE_PREFIX").unwrap_or_else(|_| "tipline".to_string());

            std::fs::create_dir_all(&log_dir).map_err(|e| {
                anyhow::anyhow!("Failed to create log directory '{}': {}", log_dir, e)
            })?;

            let file_appender = rolling::daily(&log_dir, &prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

            // The guard keeps the background logging thread alive; hold it
            // for the lifetime of the process.
            std::mem::forget(guard);

            info!(
                "Logging to daily rotating files: {}/{}.<YYYY-MM-DD>",
                log_dir, prefix
            );
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stdout)
                        .with_ansi(true)
                        .with_target(false),
                )
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

            info!("Logging to console (stdout)");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn init_with_file_destination_creates_directory() {
        let log_dir = "./test_logs_temp";
        unsafe {
            env::set_var("LOG_DESTINATION", "file");
            env::set_var("LOG_DIR", log_dir);
            env::set_var("LOG_FILE_PREFIX", "test-log");
        }

        let result = init_logging();
        assert!(result.is_ok(), "logging init should succeed: {:?}", result);
        assert!(fs::metadata(log_dir).is_ok(), "log directory should exist");

        let _ = fs::remove_dir_all(log_dir);
        unsafe {
            env::remove_var("LOG_DESTINATION");
            env::remove_var("LOG_DIR");
            env::remove_var("LOG_FILE_PREFIX");
        }
    }

    #[test]
    fn destination_defaults_to_console() {
        unsafe {
            env::remove_var("LOG_DESTINATION");
        }
        let destination = env::var("LOG_DESTINATION").unwrap_or_else(|_| "console".to_string());
        assert_eq!(destination, "console");
    }
}
