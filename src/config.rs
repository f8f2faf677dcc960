//! Engine Configuration
//!
//! Hierarchical configuration loading from:
//! - rulrast.toml (default configuration)
//! - rulrast.local.toml (git-ignored local overrides)
//! - Environment variables (RULRAST_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # rulrast.toml
//! max_iterations = 50000
//! cancel_check_interval = 4096
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! RULRAST_MAX_ITERATIONS=200000
//! RULRAST_LOGGING__LEVEL=trace
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Evaluation and resource settings for one engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-stratum iteration safety ceiling; evaluation fails loudly
    /// when a stratum has not stabilized within this many rounds
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Cancellation is checked every N-th inner join step (floored at
    /// 1000) in addition to every iteration boundary
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval: usize,

    /// Initial tuple capacity reserved per relation
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_iterations() -> usize {
    100_000
}
fn default_cancel_check_interval() -> usize {
    4096
}
fn default_initial_capacity() -> usize {
    1024
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_iterations: default_max_iterations(),
            cancel_check_interval: default_cancel_check_interval(),
            initial_capacity: default_initial_capacity(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. rulrast.toml (base configuration)
    /// 2. rulrast.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (RULRAST_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("rulrast.toml"))
            .merge(Toml::file("rulrast.local.toml"))
            .merge(Env::prefixed("RULRAST_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RULRAST_").split("__"))
            .extract()
    }
}
