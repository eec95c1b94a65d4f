//! Logging configuration section.

use serde::{Deserialize, Serialize};

/// `[logging]` in TOML. The level acts as the default `tracing` filter
/// when `RUST_LOG` is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`, or a full
    /// filter directive.
    #[serde(default = "default_level")]
    pub level: String,
    /// `json` for structured output, anything else for pretty.
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "json".to_string()
}
