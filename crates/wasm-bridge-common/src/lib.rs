//! Common types, errors, and configuration for wasm-bridge.
//!
//! This crate provides shared functionality used across the wasm-bridge workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for engine and pool settings
//! - The [`WasmArg`] value type carried by entry-point calls

pub mod config;
pub mod config_file;
pub mod error;
pub mod value;

pub use config::{
    BridgeConfig, DEFAULT_MAX_THREADS, EngineConfig, MAX_WASM32_PAGES, ModuleConfig, PoolConfig,
    PoolLimits, WASM_PAGE_SIZE,
};
pub use config_file::{ConfigFile, ConfigFileError, LoggingConfig};
pub use error::{BridgeError, HostFunctionError};
pub use value::WasmArg;
