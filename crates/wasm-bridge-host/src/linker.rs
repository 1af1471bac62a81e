//! Host function registration for Wasmtime linkers.
//!
//! This module registers the full import surface a bridged module expects:
//!
//! | Namespace | Import |
//! |---|---|
//! | `wasi_snapshot_preview1` | `random_get`, `clock_time_get`, `proc_exit` |
//! | `wasi` | `thread-spawn` |
//! | `env` | `env_hardware_concurrency`, `logstr`, `get_data`, `set_data` |
//!
//! `env.memory` is defined per instance by [`crate::instantiate`].

use wasmtime::{Caller, Linker};

use wasm_bridge_common::{BridgeError, HostFunctionError};
use wasm_bridge_core::{ContextState, MemoryRegion};

use crate::{exchange, logging, threads, wasi};

/// Register all host functions on a linker.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<ContextState>) -> Result<(), BridgeError> {
    wasi::register(linker)?;
    threads::register(linker)?;
    logging::register(linker)?;
    exchange::register(linker)?;
    Ok(())
}

/// The memory region bound to the calling context.
pub(crate) fn guest_memory(caller: &Caller<'_, ContextState>) -> Result<MemoryRegion, BridgeError> {
    caller
        .data()
        .memory()
        .cloned()
        .ok_or_else(|| HostFunctionError::MissingMemory.into())
}

/// Reinterpret a guest `i32` as an unsigned address.
#[allow(clippy::cast_sign_loss)]
pub(crate) fn guest_addr(value: i32) -> usize {
    value as u32 as usize
}

pub(crate) fn registration_error(name: &str, e: &wasmtime::Error) -> BridgeError {
    BridgeError::invalid_config(format!("Failed to register {name}: {e}"))
}
