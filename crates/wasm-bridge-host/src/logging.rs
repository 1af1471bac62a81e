//! Logging host function implementation.
//!
//! `env.logstr(addr)` forwards a NUL-terminated guest string to the context's
//! [`Logger`](wasm_bridge_core::Logger), tagged with the current memory size.

use std::backtrace::Backtrace;

use tracing::warn;
use wasmtime::{Caller, Linker};

use wasm_bridge_common::BridgeError;
use wasm_bridge_core::ContextState;

use crate::linker::{guest_addr, guest_memory, registration_error};

/// Prefix that makes a log line also emit a host backtrace.
pub const WARNING_MARKER: &str = "WARNING:";

/// Register `env.logstr`.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register(linker: &mut Linker<ContextState>) -> Result<(), BridgeError> {
    linker
        .func_wrap(
            "env",
            "logstr",
            |caller: Caller<'_, ContextState>, addr: i32| -> wasmtime::Result<()> {
                let memory = guest_memory(&caller)?;
                let message = memory.read_cstring(&caller, guest_addr(addr))?;
                let line = format_line(&message, memory.size_mib(&caller));

                let state = caller.data();
                state.logger().log(&line);
                if is_warning(&line) {
                    warn!(context = state.context_id(), "{}", message);
                    state.logger().log(&Backtrace::force_capture().to_string());
                }
                Ok(())
            },
        )
        .map_err(|e| registration_error("logstr", &e))?;

    Ok(())
}

/// `message` with the memory size appended, as forwarded to the logger.
pub fn format_line(message: &str, memory_mib: f64) -> String {
    format!("{message} (mem: {memory_mib:.2}MiB)")
}

/// Whether a line carries the warning marker.
pub fn is_warning(line: &str) -> bool {
    line.starts_with(WARNING_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line() {
        assert_eq!(format_line("hello", 32.0), "hello (mem: 32.00MiB)");
        assert_eq!(format_line("", 1.5), " (mem: 1.50MiB)");
        assert_eq!(format_line("x", 7.123), "x (mem: 7.12MiB)");
    }

    #[test]
    fn test_is_warning() {
        assert!(is_warning("WARNING: low memory (mem: 1.00MiB)"));
        assert!(!is_warning("warning: lowercase"));
        assert!(!is_warning("info WARNING: not a prefix"));
    }
}
