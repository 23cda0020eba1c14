//! Structured logging setup.

use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    #[default]
    Text,
    Json,
}

/// Parses a config level name. Unknown names fall back to `INFO`.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" | "CRITICAL" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Installs the global subscriber once. Later calls are no-ops.
/// `RUST_LOG` directives are honoured on top of `log_level`.
/// Logs go to stderr so that stdout carries only alerts and console output.
pub fn setup_logging(log_level: &str, mode: LogMode) {
    let level = parse_level(log_level);

    INIT.call_once(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy()
            .add_directive("hyper=warn".parse().unwrap_or_else(|_| level.into()))
            .add_directive("reqwest=warn".parse().unwrap_or_else(|_| level.into()));

        let builder = tracing_subscriber::fmt()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_env_filter(filter);
        // try_init: a test harness may have installed a subscriber already
        let installed = match mode {
            LogMode::Json => builder.json().try_init(),
            LogMode::Text => builder.try_init(),
        };

        if installed.is_ok() {
            tracing::info!(log_level = %level, ?mode, "logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("Warning"), Level::WARN);
        assert_eq!(parse_level("CRITICAL"), Level::ERROR);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn setup_is_idempotent() {
        setup_logging("DEBUG", LogMode::Text);
        setup_logging("ERROR", LogMode::Json);
    }
}
