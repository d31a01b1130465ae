//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (`CORE_*` prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [store]
//! data_dir = "/var/lib/voxlogica/store"
//!
//! [engine]
//! workers = 8
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! CORE_STORE__DATA_DIR=/custom/path
//! CORE_ENGINE__WORKERS=4
//! ```
//!
//! The three flat variables named by the external interface contract
//! (`CORE_STORE_PATH`, `CORE_WORKERS`, `CORE_RECURSION_LIMIT`) are layered on
//! top of the structured config as a final pass, so a deployment that only
//! sets one of them doesn't need a `config.toml` at all.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Errors raised while loading configuration (§7, part of `CoreError`).
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ConfigError(#[from] figment::Error);

/// Top-level configuration for a core run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub reducer: ReducerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Result store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory backing the durable tier's write-ahead log.
    pub data_dir: PathBuf,

    /// Number of WAL entries accumulated before a compaction pass.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,

    /// Whether to fsync the WAL on every `put_success`/`put_failure`.
    #[serde(default = "default_true")]
    pub sync_on_write: bool,
}

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool size. 0 = use all available CPU cores.
    #[serde(default)]
    pub workers: usize,

    /// Optional per-run wall-clock deadline, in milliseconds (0 = unlimited).
    #[serde(default)]
    pub deadline_ms: u64,

    /// Maximum number of in-flight `dask_map` element expansions (0 = unlimited).
    #[serde(default)]
    pub max_inflight_map_elements: usize,
}

/// Reducer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerConfig {
    /// Maximum call-chain depth through user-defined functions before
    /// `RecursionDepthExceeded` is raised.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_compaction_threshold() -> usize {
    1000
}
fn default_recursion_limit() -> usize {
    1024
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. `config.toml` (base configuration)
    /// 2. `config.local.toml` (local overrides, git-ignored)
    /// 3. Environment variables (`CORE_*` prefix, `__`-nested)
    /// 4. The three flat env vars named in the external interface contract
    pub fn load() -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("CORE_").split("__"));
        let mut config: Config = figment.extract()?;
        config.apply_flat_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CORE_").split("__"));
        let mut config: Config = figment.extract()?;
        config.apply_flat_env_overrides();
        Ok(config)
    }

    /// Apply the three contract-named flat environment variables on top of
    /// whatever figment already resolved.
    fn apply_flat_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CORE_STORE_PATH") {
            self.store.data_dir = PathBuf::from(path);
        }
        if let Ok(workers) = std::env::var("CORE_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.engine.workers = n;
            }
        }
        if let Ok(limit) = std::env::var("CORE_RECURSION_LIMIT") {
            if let Ok(n) = limit.parse() {
                self.reducer.recursion_limit = n;
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig {
                data_dir: PathBuf::from("./voxlogica-store"),
                compaction_threshold: default_compaction_threshold(),
                sync_on_write: true,
            },
            engine: EngineConfig {
                workers: 0,
                deadline_ms: 0,
                max_inflight_map_elements: 0,
            },
            reducer: ReducerConfig {
                recursion_limit: default_recursion_limit(),
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.reducer.recursion_limit, 1024);
        assert_eq!(config.engine.workers, 0);
        assert!(config.store.sync_on_write);
    }

    #[test]
    fn config_serialization_round_trips() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[reducer]"));
    }

    #[test]
    fn flat_env_overrides_take_precedence() {
        std::env::set_var("CORE_WORKERS", "7");
        let mut config = Config::default();
        config.apply_flat_env_overrides();
        assert_eq!(config.engine.workers, 7);
        std::env::remove_var("CORE_WORKERS");
    }
}
