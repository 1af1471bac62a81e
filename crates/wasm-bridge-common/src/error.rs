//! Error types for wasm-bridge.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`BridgeError`]: Top-level errors for pool initialization and calls
//! - [`HostFunctionError`]: Errors raised inside host functions imported by the guest

use std::io;

use thiserror::Error;

/// Top-level bridge errors.
///
/// These errors represent failures across the lifecycle of a pool, from
/// loading the module to dispatching calls into an instance.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Fetching, compiling or instantiating the module failed.
    #[error("Module load failed: {reason}")]
    ModuleLoad {
        /// Description of the load failure.
        reason: String,
    },

    /// Requested thread count or memory bounds are outside the configured limits.
    #[error("Capacity exceeded: {reason}")]
    Capacity {
        /// Description of the violated bound.
        reason: String,
    },

    /// The call dispatcher was asked for an export the instance does not have.
    #[error("WASM function {name} not found.")]
    ExportNotFound {
        /// The requested symbol.
        name: String,
    },

    /// An exported function trapped during execution.
    #[error("WASM function {function} aborted, error: {message}")]
    RuntimeTrap {
        /// The function that was being invoked.
        function: String,
        /// Trap description, including the guest backtrace when available.
        message: String,
    },

    /// The execution context has been terminated and accepts no further calls.
    #[error("Execution context terminated: {context}")]
    ContextTerminated {
        /// Identifier of the terminated context.
        context: String,
    },

    /// Arguments did not match the signature of the target function.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the mismatch.
        reason: String,
    },

    /// A guest memory access fell outside the memory region.
    #[error("Memory access out of bounds: {reason}")]
    MemoryAccess {
        /// Description of the offending access.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// A host function returned an error.
    #[error("Host function error: {0}")]
    HostFunction(#[from] HostFunctionError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from host function implementations.
///
/// Some of these are fatal to the calling guest (they surface as traps), others
/// are only ever logged.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// `thread-spawn` was called on a pool without worker contexts.
    #[error("Thread spawn requested but the pool has no worker contexts")]
    SpawnUnavailable,

    /// The thread identifier counter reached its ceiling.
    #[error("Thread identifiers exhausted (limit {limit})")]
    ThreadIdsExhausted {
        /// Highest identifier that can be issued.
        limit: u32,
    },

    /// Dispatching a spawned thread to its worker failed after the id was returned.
    ///
    /// Only ever logged: the guest that issued the spawn has already resumed.
    #[error("Failed to start thread {thread_id} on worker {worker}: {reason}")]
    SpawnDispatch {
        /// Identifier handed back to the guest.
        thread_id: u32,
        /// Index of the target worker.
        worker: usize,
        /// Why the dispatch failed.
        reason: String,
    },

    /// `get_data` was called for a key that was never stored.
    #[error("get_data miss {key}")]
    KvMiss {
        /// The missing key.
        key: String,
    },

    /// The instance has no memory region attached.
    #[error("No memory region attached to this context")]
    MissingMemory,
}

impl BridgeError {
    /// Create a new `ModuleLoad` error.
    pub fn module_load(reason: impl Into<String>) -> Self {
        Self::ModuleLoad {
            reason: reason.into(),
        }
    }

    /// Create a new `Capacity` error.
    pub fn capacity(reason: impl Into<String>) -> Self {
        Self::Capacity {
            reason: reason.into(),
        }
    }

    /// Create a new `ExportNotFound` error.
    pub fn export_not_found(name: impl Into<String>) -> Self {
        Self::ExportNotFound { name: name.into() }
    }

    /// Create a new `RuntimeTrap` error.
    pub fn trap(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuntimeTrap {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create a new `ContextTerminated` error.
    pub fn terminated(context: impl Into<String>) -> Self {
        Self::ContextTerminated {
            context: context.into(),
        }
    }

    /// Create a new `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a new `MemoryAccess` error.
    pub fn memory_access(reason: impl Into<String>) -> Self {
        Self::MemoryAccess {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates a missing export.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ExportNotFound { .. })
    }

    /// Returns `true` if this error indicates a configured bound was exceeded.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }

    /// Returns `true` if the target context is gone.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::ContextTerminated { .. })
    }

    /// Returns `true` if this error came from a trapping guest call.
    pub fn is_trap(&self) -> bool {
        matches!(self, Self::RuntimeTrap { .. })
    }
}
