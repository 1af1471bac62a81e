//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is shared by every execution context in a pool. It is:
//! - Thread-safe and cheap to clone
//! - Configured with the threads proposal so modules can import shared memory
//! - Set up with epoch interruption so teardown can stop running guests

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, OptLevel};

use wasm_bridge_common::{BridgeError, EngineConfig};

/// Thread-safe WebAssembly engine wrapper.
///
/// Modules compiled against this engine can be instantiated in any number of
/// stores on any thread, which is how worker contexts share one compiled
/// artifact.
///
/// # Example
///
/// ```ignore
/// use wasm_bridge_common::EngineConfig;
/// use wasm_bridge_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is rejected.
    pub fn new(config: &EngineConfig) -> Result<Self, BridgeError> {
        let mut wasmtime_config = Config::new();

        // Shared linear memory and atomics
        wasmtime_config.wasm_threads(true);

        if config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        wasmtime_config.parallel_compilation(config.parallel_compilation);
        wasmtime_config.cranelift_opt_level(OptLevel::Speed);

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            BridgeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            epoch_interruption = config.epoch_interruption,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Increment the epoch counter.
    ///
    /// Every store on this engine runs its epoch callback at the next check,
    /// which is where terminated contexts abort their guest code.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Check if epoch interruption is enabled.
    pub fn is_epoch_enabled(&self) -> bool {
        self.config.epoch_interruption
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("epoch_interruption", &self.config.epoch_interruption)
            .field("parallel_compilation", &self.config.parallel_compilation)
            .finish_non_exhaustive()
    }
}
