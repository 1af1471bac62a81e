//! Configuration file structures for wasm-bridge.
//!
//! This module defines the TOML configuration file read by the runner:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`LoggingConfig`]: Log filter settings

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{EngineConfig, ModuleConfig, PoolConfig};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [engine]
/// epoch_interruption = true
///
/// [pool]
/// threads = 8
/// initial_pages = 512
/// max_pages = 65536
///
/// [module]
/// plain = "./modules/compute.wasm"
/// threads = "./modules/compute-threads.wasm"
///
/// [logging]
/// filter = "info,wasm_bridge=debug"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Wasmtime engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Module variant locations.
    #[serde(default)]
    pub module: ModuleConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` env-filter directive, overridden by `RUST_LOG`.
    #[serde(default = "defaults::filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: defaults::filter(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

mod defaults {
    pub fn filter() -> String {
        "info,wasm_bridge=debug".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert!(config.pool.threads.is_none());
        assert_eq!(config.pool.max_threads, 32);
        assert!(config.module.plain.is_empty());
        assert_eq!(config.logging.filter, "info,wasm_bridge=debug");
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [module]
            plain = "./compute.wasm"
            threads = "./compute-threads.wasm"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.module.plain, "./compute.wasm");
        assert_eq!(config.module.threads, "./compute-threads.wasm");
        // Defaults applied
        assert_eq!(config.pool.initial_pages, 512);
        assert!(config.engine.epoch_interruption);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [engine]
            epoch_interruption = false
            parallel_compilation = false

            [pool]
            threads = 4
            max_threads = 16
            initial_pages = 25
            max_pages = 1024

            [module]
            plain = "./a.wasm"
            threads = "./a-threads.cwasm"

            [logging]
            filter = "debug"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert!(!config.engine.epoch_interruption);
        assert!(!config.engine.parallel_compilation);
        assert_eq!(config.pool.threads, Some(4));
        assert_eq!(config.pool.max_threads, 16);
        assert_eq!(config.pool.initial_pages, 25);
        assert_eq!(config.pool.max_pages, 1024);
        assert_eq!(config.module.threads, "./a-threads.cwasm");
        assert_eq!(config.logging.filter, "debug");

        let limits = config.pool.validate().unwrap();
        assert_eq!(limits.worker_count(), 3);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigFile::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
