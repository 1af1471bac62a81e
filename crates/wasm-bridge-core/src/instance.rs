//! A runnable binding of module and memory region within one context.
//!
//! [`BridgeInstance`] owns the context's [`Store`] and the instantiated
//! module. It routes every export call through a [`CallDispatcher`] whose
//! failure policy follows the context's role, and exposes the memory access
//! primitives against the bound region.
//!
//! Linking and instantiation live in the host-function crate; this type
//! takes over once an instance exists.

use tracing::{debug, info};
use wasmtime::{Instance, Store};

use wasm_bridge_common::{BridgeError, HostFunctionError, WasmArg};

use crate::dispatch::CallDispatcher;
use crate::module::{INITIALIZE_EXPORT, THREAD_START_EXPORT};
use crate::store::{ContextState, Role};
use crate::MemoryRegion;

/// One instantiated module with its store.
pub struct BridgeInstance {
    store: Store<ContextState>,
    instance: Instance,
    dispatcher: CallDispatcher,
}

impl BridgeInstance {
    /// Wrap an instance; the dispatcher policy follows the store's role.
    pub fn new(store: Store<ContextState>, instance: Instance) -> Self {
        let dispatcher = CallDispatcher::from(store.data().role());
        Self {
            store,
            instance,
            dispatcher,
        }
    }

    /// Wrap an instance with an explicit dispatcher.
    pub fn with_dispatcher(store: Store<ContextState>, instance: Instance, dispatcher: CallDispatcher) -> Self {
        Self {
            store,
            instance,
            dispatcher,
        }
    }

    /// Invoke export `name`. See [`CallDispatcher::call`].
    ///
    /// # Errors
    ///
    /// Propagates every dispatcher error.
    pub fn call(&mut self, name: &str, args: &[WasmArg]) -> Result<Option<u32>, BridgeError> {
        self.dispatcher.call(&mut self.store, &self.instance, name, args)
    }

    /// Run the module's static initialisation.
    ///
    /// # Errors
    ///
    /// Fails if `_initialize` is missing or traps.
    pub fn initialize(&mut self) -> Result<(), BridgeError> {
        self.call(INITIALIZE_EXPORT, &[])?;
        info!(context = self.context_id(), "Module initialized");
        Ok(())
    }

    /// Run a spawned thread: `wasi_thread_start(thread_id, arg)`.
    ///
    /// # Errors
    ///
    /// Fails if the export is missing, or as the dispatcher policy dictates
    /// when the thread traps.
    pub fn start_thread(&mut self, thread_id: u32, arg: u32) -> Result<(), BridgeError> {
        debug!(context = self.context_id(), thread_id, arg, "Starting thread");
        self.call(THREAD_START_EXPORT, &[thread_id.into(), arg.into()])?;
        Ok(())
    }

    /// Whether the instance exports a function called `name`.
    pub fn has_export(&mut self, name: &str) -> bool {
        self.instance.get_func(&mut self.store, name).is_some()
    }

    pub fn role(&self) -> Role {
        self.store.data().role()
    }

    pub fn context_id(&self) -> &str {
        self.store.data().context_id()
    }

    pub fn dispatcher(&self) -> CallDispatcher {
        self.dispatcher
    }

    pub fn state(&self) -> &ContextState {
        self.store.data()
    }

    pub fn store_mut(&mut self) -> &mut Store<ContextState> {
        &mut self.store
    }

    /// Terminate this context. Later calls fail with `ContextTerminated`.
    pub fn terminate(&self) {
        self.store.data().terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.store.data().is_terminated()
    }

    /// The bound memory region.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::MissingMemory`] if none is attached.
    pub fn memory(&self) -> Result<&MemoryRegion, BridgeError> {
        self.store
            .data()
            .memory()
            .ok_or_else(|| HostFunctionError::MissingMemory.into())
    }

    /// Current memory size in bytes.
    ///
    /// # Errors
    ///
    /// Fails if no memory is attached.
    pub fn memory_size(&self) -> Result<usize, BridgeError> {
        Ok(self.memory()?.size(&self.store))
    }

    /// Copy `[start, end)` out of memory.
    ///
    /// # Errors
    ///
    /// Fails if no memory is attached or the range is out of bounds.
    pub fn read_memory(&self, start: usize, end: usize) -> Result<Vec<u8>, BridgeError> {
        self.memory()?.slice(&self.store, start, end)
    }

    /// Copy `bytes` into memory at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if no memory is attached or the write is out of bounds.
    pub fn write_memory(&mut self, offset: usize, bytes: &[u8]) -> Result<(), BridgeError> {
        let memory = self.memory()?.clone();
        memory.write(&mut self.store, offset, bytes)
    }

    /// Decode the NUL-terminated string at `addr`.
    ///
    /// # Errors
    ///
    /// Fails if no memory is attached or the string is unterminated.
    pub fn read_cstring(&self, addr: usize) -> Result<String, BridgeError> {
        self.memory()?.read_cstring(&self.store, addr)
    }
}

impl std::fmt::Debug for BridgeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeInstance")
            .field("context", &self.context_id())
            .field("policy", &self.dispatcher.policy())
            .finish_non_exhaustive()
    }
}
