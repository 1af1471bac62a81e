//! KV exchange imports: `env.get_data` and `env.set_data`.
//!
//! `set_data` copies bytes out of linear memory into the pool's
//! [`KvStore`](wasm_bridge_core::KvStore). `get_data` copies them back to an
//! address chosen by the guest, which must have made room for them; the size
//! is agreed out of band. A miss is logged and leaves memory untouched.

use tracing::debug;
use wasmtime::{Caller, Linker};

use wasm_bridge_common::{BridgeError, HostFunctionError};
use wasm_bridge_core::ContextState;

use crate::linker::{guest_addr, guest_memory, registration_error};

/// Register `env.get_data` and `env.set_data`.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register(linker: &mut Linker<ContextState>) -> Result<(), BridgeError> {
    linker
        .func_wrap(
            "env",
            "get_data",
            |mut caller: Caller<'_, ContextState>, key_addr: i32, out_addr: i32| -> wasmtime::Result<()> {
                let memory = guest_memory(&caller)?;
                let key = memory.read_cstring(&caller, guest_addr(key_addr))?;

                let Some(data) = caller.data().kv().get(&key) else {
                    let miss = HostFunctionError::KvMiss { key };
                    caller.data().logger().log(&miss.to_string());
                    debug!(context = caller.data().context_id(), "{}", miss);
                    return Ok(());
                };

                memory.write(&mut caller, guest_addr(out_addr), &data)?;
                Ok(())
            },
        )
        .map_err(|e| registration_error("get_data", &e))?;

    linker
        .func_wrap(
            "env",
            "set_data",
            |caller: Caller<'_, ContextState>, key_addr: i32, data_addr: i32, len: i32| -> wasmtime::Result<()> {
                let memory = guest_memory(&caller)?;
                let key = memory.read_cstring(&caller, guest_addr(key_addr))?;

                let start = guest_addr(data_addr);
                let end = start
                    .checked_add(guest_addr(len))
                    .ok_or_else(|| BridgeError::memory_access("set_data range overflows"))?;
                let data = memory.slice(&caller, start, end)?;

                debug!(context = caller.data().context_id(), key = %key, len = data.len(), "set_data");
                caller.data().kv().set(key, data);
                Ok(())
            },
        )
        .map_err(|e| registration_error("set_data", &e))?;

    Ok(())
}
