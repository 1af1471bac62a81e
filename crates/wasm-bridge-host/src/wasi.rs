//! The `wasi_snapshot_preview1` subset a bridged module imports.
//!
//! Only three calls are provided: randomness, the wall clock and `proc_exit`.
//! Everything else in the preview1 surface is stubbed inside the module.

use std::backtrace::Backtrace;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{error, trace};
use wasmtime::{Caller, Linker};

use wasm_bridge_common::BridgeError;
use wasm_bridge_core::ContextState;

use crate::linker::{guest_addr, guest_memory, registration_error};

const NAMESPACE: &str = "wasi_snapshot_preview1";

/// errno for success.
const ERRNO_SUCCESS: i32 = 0;

/// Diagnostic logged when the guest calls `proc_exit`.
pub const PROC_EXIT_MESSAGE: &str =
    "PANIC: proc_exit was called. This is maybe caused by \"joining\" with unstable wasi pthreads.";

/// Register `random_get`, `clock_time_get` and `proc_exit`.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register(linker: &mut Linker<ContextState>) -> Result<(), BridgeError> {
    linker
        .func_wrap(
            NAMESPACE,
            "random_get",
            |mut caller: Caller<'_, ContextState>, buf: i32, len: i32| -> wasmtime::Result<i32> {
                let memory = guest_memory(&caller)?;
                let len = guest_addr(len);
                if len > memory.size(&caller) {
                    return Err(BridgeError::memory_access(format!("random_get of {len} bytes exceeds memory")).into());
                }
                let bytes = random_bytes(len);
                memory.write(&mut caller, guest_addr(buf), &bytes)?;
                Ok(ERRNO_SUCCESS)
            },
        )
        .map_err(|e| registration_error("random_get", &e))?;

    linker
        .func_wrap(
            NAMESPACE,
            "clock_time_get",
            |mut caller: Caller<'_, ContextState>, _clock_id: i32, _precision: i64, out: i32| -> wasmtime::Result<i32> {
                let memory = guest_memory(&caller)?;
                let now = now_nanos();
                trace!(now, "clock_time_get");
                memory.write(&mut caller, guest_addr(out), &now.to_le_bytes())?;
                Ok(ERRNO_SUCCESS)
            },
        )
        .map_err(|e| registration_error("clock_time_get", &e))?;

    linker
        .func_wrap(
            NAMESPACE,
            "proc_exit",
            |mut caller: Caller<'_, ContextState>, code: i32| -> wasmtime::Result<()> {
                let state = caller.data();
                state.logger().log(PROC_EXIT_MESSAGE);
                state.logger().log(&Backtrace::force_capture().to_string());
                error!(context = state.context_id(), code, "Guest called proc_exit");

                caller.data_mut().request_exit();
                Err(wasmtime::Error::msg(format!("proc_exit({code})")))
            },
        )
        .map_err(|e| registration_error("proc_exit", &e))?;

    Ok(())
}

/// `len` bytes from the operating system's secure generator.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}
