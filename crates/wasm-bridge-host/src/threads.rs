//! Thread control imports: `wasi.thread-spawn` and `env.env_hardware_concurrency`.

use tracing::debug;
use wasmtime::{Caller, Linker};

use wasm_bridge_common::{BridgeError, HostFunctionError};
use wasm_bridge_core::ContextState;

use crate::linker::registration_error;

/// Register the thread control imports.
///
/// `thread-spawn` returns the new thread's id without waiting for the thread
/// to start. It traps when the context has no spawner or the pool has no
/// workers.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register(linker: &mut Linker<ContextState>) -> Result<(), BridgeError> {
    linker
        .func_wrap(
            "wasi",
            "thread-spawn",
            |caller: Caller<'_, ContextState>, arg: i32| -> wasmtime::Result<i32> {
                let state = caller.data();
                let spawner = state.spawner().ok_or(HostFunctionError::SpawnUnavailable)?;

                #[allow(clippy::cast_sign_loss)]
                let thread_id = spawner.spawn_thread(arg as u32, state.logger())?;
                debug!(context = state.context_id(), thread_id, "thread-spawn");

                let thread_id = i32::try_from(thread_id)
                    .map_err(|_| HostFunctionError::ThreadIdsExhausted { limit: i32::MAX.unsigned_abs() })?;
                Ok(thread_id)
            },
        )
        .map_err(|e| registration_error("thread-spawn", &e))?;

    linker
        .func_wrap(
            "env",
            "env_hardware_concurrency",
            |caller: Caller<'_, ContextState>| -> i32 {
                i32::try_from(caller.data().hardware_concurrency()).unwrap_or(i32::MAX)
            },
        )
        .map_err(|e| registration_error("env_hardware_concurrency", &e))?;

    Ok(())
}
