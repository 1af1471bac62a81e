//! Instantiation of a compiled module for one execution context.

use tracing::{debug, instrument};
use wasmtime::Linker;

use wasm_bridge_common::BridgeError;
use wasm_bridge_core::{BridgeInstance, CompiledModule, ContextState, MemoryRegion, WasmEngine, create_store};

use crate::linker::register_all;

/// Where an instance's `env.memory` comes from.
#[derive(Debug, Clone)]
pub enum MemorySource {
    /// Allocate a new region. Used by the coordinator.
    Allocate {
        initial_pages: u32,
        max_pages: u32,
        shared: bool,
    },
    /// Bind a region another context already allocated. Must be shared.
    Existing(MemoryRegion),
}

/// Link the host functions and `memory`, then instantiate `module`.
///
/// # Errors
///
/// Returns [`BridgeError::ModuleLoad`] if memory cannot be allocated, an
/// existing region is not shared, or the module's imports cannot be satisfied.
#[instrument(skip_all, fields(context = state.context_id(), role = %state.role()))]
pub fn instantiate(
    engine: &WasmEngine,
    module: &CompiledModule,
    state: ContextState,
    memory: MemorySource,
) -> Result<BridgeInstance, BridgeError> {
    let mut store = create_store(engine, state);

    let region = match memory {
        MemorySource::Allocate {
            initial_pages,
            max_pages,
            shared: true,
        } => MemoryRegion::shared(engine, initial_pages, max_pages)?,
        MemorySource::Allocate {
            initial_pages,
            max_pages,
            shared: false,
        } => MemoryRegion::local(&mut store, initial_pages, max_pages)?,
        MemorySource::Existing(region) if region.is_shared() => region,
        MemorySource::Existing(_) => {
            return Err(BridgeError::module_load(
                "only shared memory can be bound into another context",
            ));
        }
    };
    store.data_mut().attach_memory(region.clone());

    let mut linker = Linker::new(engine.inner());
    register_all(&mut linker)?;
    linker
        .define(&store, "env", "memory", region.as_extern())
        .map_err(|e| BridgeError::module_load(format!("Failed to define env.memory: {e}")))?;

    let instance = linker
        .instantiate(&mut store, module.inner())
        .map_err(|e| BridgeError::module_load(format!("Instantiation failed: {e:#}")))?;

    debug!(
        pages = region.pages(&store),
        shared = region.is_shared(),
        "Module instantiated"
    );

    Ok(BridgeInstance::new(store, instance))
}
