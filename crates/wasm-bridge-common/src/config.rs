//! Configuration structures for wasm-bridge.
//!
//! This module defines configuration options for the bridge components:
//! - [`BridgeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings
//! - [`PoolConfig`]: Thread count and memory bounds for a pool
//! - [`ModuleConfig`]: Locations of the two module variants

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::BridgeError;

/// Size of one WebAssembly page in bytes.
pub const WASM_PAGE_SIZE: u64 = 65_536;

/// Largest page count addressable by a 32-bit linear memory (4 GiB).
pub const MAX_WASM32_PAGES: u32 = 65_536;

/// Default ceiling on the number of execution contexts in a pool.
pub const DEFAULT_MAX_THREADS: u32 = 32;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Pool sizing configuration.
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Wasmtime engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable epoch-based interruption.
    ///
    /// Tearing down a pool bumps the engine epoch so that worker contexts
    /// still executing guest code trap at their next epoch check.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,

    /// Compile function bodies in parallel.
    #[serde(default = "defaults::parallel_compilation")]
    pub parallel_compilation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            epoch_interruption: defaults::epoch_interruption(),
            parallel_compilation: defaults::parallel_compilation(),
        }
    }
}

/// Pool sizing configuration.
///
/// Memory sizes are expressed in 64 KiB WebAssembly pages.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Total execution contexts (coordinator + workers).
    ///
    /// `None` resolves to `min(available cores, max_threads)`.
    #[serde(default)]
    pub threads: Option<u32>,

    /// Ceiling on `threads`.
    #[serde(default = "defaults::max_threads")]
    pub max_threads: u32,

    /// Initial size of the memory region in pages.
    #[serde(default = "defaults::initial_pages")]
    pub initial_pages: u32,

    /// Hard maximum of the memory region in pages.
    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: None,
            max_threads: defaults::max_threads(),
            initial_pages: defaults::initial_pages(),
            max_pages: defaults::max_pages(),
        }
    }
}

/// Pool bounds after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Total execution contexts, coordinator included.
    pub threads: u32,
    /// Initial memory size in pages.
    pub initial_pages: u32,
    /// Maximum memory size in pages.
    pub max_pages: u32,
}

impl PoolLimits {
    /// Number of worker contexts (every context except the coordinator).
    pub fn worker_count(&self) -> usize {
        self.threads.saturating_sub(1) as usize
    }

    /// Whether the pool needs the shared-memory module variant.
    pub fn is_threaded(&self) -> bool {
        self.threads > 1
    }

    /// Initial memory size in MiB.
    pub fn initial_mib(&self) -> f64 {
        pages_to_mib(self.initial_pages)
    }

    /// Maximum memory size in MiB.
    pub fn max_mib(&self) -> f64 {
        pages_to_mib(self.max_pages)
    }
}

impl PoolConfig {
    /// Create a config for an explicit thread count with default memory bounds.
    pub fn with_threads(threads: u32) -> Self {
        Self {
            threads: Some(threads),
            ..Default::default()
        }
    }

    /// Set the memory bounds in pages.
    #[must_use]
    pub fn with_memory_pages(mut self, initial_pages: u32, max_pages: u32) -> Self {
        self.initial_pages = initial_pages;
        self.max_pages = max_pages;
        self
    }

    /// Thread count to use when none is configured.
    pub fn default_threads(&self) -> u32 {
        let cores = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        u32::try_from(cores)
            .unwrap_or(u32::MAX)
            .min(self.max_threads)
            .max(1)
    }

    /// Validate the configuration and resolve the thread count.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Capacity`] when the thread count or memory
    /// bounds fall outside the allowed ranges.
    pub fn validate(&self) -> Result<PoolLimits, BridgeError> {
        if self.max_threads == 0 {
            return Err(BridgeError::capacity("max_threads must be at least 1"));
        }

        let threads = self.threads.unwrap_or_else(|| self.default_threads());
        if threads == 0 || threads > self.max_threads {
            return Err(BridgeError::capacity(format!(
                "thread count {threads} outside [1, {}]",
                self.max_threads
            )));
        }

        if self.initial_pages == 0 {
            return Err(BridgeError::capacity("initial memory must be at least 1 page"));
        }
        if self.max_pages > MAX_WASM32_PAGES {
            return Err(BridgeError::capacity(format!(
                "maximum memory {} pages exceeds the 32-bit limit of {MAX_WASM32_PAGES}",
                self.max_pages
            )));
        }
        if self.initial_pages > self.max_pages {
            return Err(BridgeError::capacity(format!(
                "initial memory {} pages exceeds maximum {} pages",
                self.initial_pages, self.max_pages
            )));
        }

        debug!(
            threads,
            initial_pages = self.initial_pages,
            max_pages = self.max_pages,
            "Pool configuration validated"
        );

        Ok(PoolLimits {
            threads,
            initial_pages: self.initial_pages,
            max_pages: self.max_pages,
        })
    }
}

/// Locations of the compiled module variants.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModuleConfig {
    /// Module built for single-threaded execution (non-shared memory).
    pub plain: String,

    /// Module built for threaded execution (shared memory import).
    pub threads: String,
}

#[allow(clippy::cast_precision_loss)]
fn pages_to_mib(pages: u32) -> f64 {
    (u64::from(pages) * WASM_PAGE_SIZE) as f64 / (1024.0 * 1024.0)
}

/// Default value functions for serde.
mod defaults {
    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn parallel_compilation() -> bool {
        true
    }

    pub const fn max_threads() -> u32 {
        super::DEFAULT_MAX_THREADS
    }

    /// 32 MiB.
    pub const fn initial_pages() -> u32 {
        512
    }

    /// 4 GiB.
    pub const fn max_pages() -> u32 {
        super::MAX_WASM32_PAGES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();

        assert!(config.engine.epoch_interruption);
        assert!(config.engine.parallel_compilation);

        assert!(config.pool.threads.is_none());
        assert_eq!(config.pool.max_threads, 32);
        assert_eq!(config.pool.initial_pages, 512);
        assert_eq!(config.pool.max_pages, 65_536);
    }

    #[test]
    fn test_default_threads_within_ceiling() {
        let config = PoolConfig::default();
        let threads = config.default_threads();
        assert!((1..=32).contains(&threads));

        let limits = config.validate().unwrap();
        assert_eq!(limits.threads, threads);
    }

    #[test]
    fn test_validate_thread_bounds() {
        for threads in 1..=32 {
            let limits = PoolConfig::with_threads(threads).validate().unwrap();
            assert_eq!(limits.threads, threads);
            assert_eq!(limits.worker_count(), (threads - 1) as usize);
        }

        assert!(PoolConfig::with_threads(0).validate().unwrap_err().is_capacity());
        assert!(PoolConfig::with_threads(33).validate().unwrap_err().is_capacity());
    }

    #[test]
    fn test_validate_configurable_ceiling() {
        let config = PoolConfig {
            threads: Some(8),
            max_threads: 4,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_capacity());

        let config = PoolConfig {
            threads: Some(48),
            max_threads: 64,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap().threads, 48);
    }

    #[test]
    fn test_validate_memory_bounds() {
        let config = PoolConfig::with_threads(1).with_memory_pages(10, 5);
        assert!(config.validate().unwrap_err().is_capacity());

        let config = PoolConfig::with_threads(1).with_memory_pages(0, 5);
        assert!(config.validate().unwrap_err().is_capacity());

        let config = PoolConfig::with_threads(1).with_memory_pages(1, 65_537);
        assert!(config.validate().unwrap_err().is_capacity());

        let config = PoolConfig::with_threads(2).with_memory_pages(1, 1);
        let limits = config.validate().unwrap();
        assert!(limits.is_threaded());
    }

    #[test]
    fn test_limits_mib() {
        let limits = PoolConfig::with_threads(1).validate().unwrap();
        assert!((limits.initial_mib() - 32.0).abs() < f64::EPSILON);
        assert!((limits.max_mib() - 4096.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"pool": {"threads": 4}}"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.pool.threads, Some(4));
        assert_eq!(config.pool.initial_pages, 512);
        assert!(config.engine.epoch_interruption);
    }
}
