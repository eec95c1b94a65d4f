//! Database configuration section.

use serde::{Deserialize, Serialize};

/// `[database]` in TOML: PostgreSQL URL plus pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL. The only required setting in this section.
    pub url: String,
    /// Pool size ceiling.
    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,
    /// Connections kept warm even when idle.
    #[serde(default = "defaults::min_connections")]
    pub min_connections: u32,
    #[serde(default = "defaults::connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "defaults::idle_timeout")]
    pub idle_timeout_seconds: u64,
}

mod defaults {
    pub fn max_connections() -> u32 {
        20
    }

    pub fn min_connections() -> u32 {
        5
    }

    pub fn connect_timeout() -> u64 {
        10
    }

    pub fn idle_timeout() -> u64 {
        300
    }
}
