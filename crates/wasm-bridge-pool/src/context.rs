//! The execution-context capability and its in-thread implementation.
//!
//! [`ExecutionContext`] is what callers see of any context in a pool. The
//! coordinator is a [`LocalContext`] running on the caller's thread; workers
//! are [`WorkerClient`](crate::WorkerClient) stubs that forward the same
//! operations to a `LocalContext` on a dedicated thread.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use wasm_bridge_common::{BridgeError, PoolLimits, WasmArg};
use wasm_bridge_core::{
    BridgeInstance, CompiledModule, ContextState, KvStore, Logger, MemoryRegion, Role, ThreadSpawner, WasmEngine,
};
use wasm_bridge_host::{MemorySource, instantiate};

use crate::protocol::CallRequest;

/// Context id of the pool coordinator.
pub const COORDINATOR_ID: &str = "coordinator";

/// Operations every execution context supports, local or remote.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Identifier used in logs and errors.
    fn context_id(&self) -> &str;

    fn role(&self) -> Role;

    /// Whether the context has been terminated.
    fn is_terminated(&self) -> bool;

    /// Run a spawned thread: `wasi_thread_start(thread_id, arg)`.
    async fn init_thread(&self, thread_id: u32, arg: u32) -> Result<(), BridgeError>;

    /// Invoke an export.
    async fn call(&self, request: CallRequest) -> Result<Option<u32>, BridgeError>;

    /// Terminate the context. Idempotent.
    async fn destroy(&self);
}

/// Everything a worker needs to join a pool.
#[derive(Clone)]
pub struct ContextSetup {
    pub engine: WasmEngine,
    pub module: CompiledModule,
    /// The coordinator's region. Must be shared.
    pub memory: MemoryRegion,
    pub kv: KvStore,
    /// Sink for the worker's guest log lines.
    pub logger: Logger,
    pub spawner: Arc<dyn ThreadSpawner>,
}

/// A context whose instance lives on the current thread.
pub struct LocalContext {
    context_id: String,
    role: Role,
    instance: Mutex<BridgeInstance>,
}

impl LocalContext {
    /// Instantiate the coordinator: allocate memory and run `_initialize`.
    ///
    /// # Errors
    ///
    /// Fails if memory cannot be allocated, the module cannot be
    /// instantiated, or `_initialize` is missing or traps.
    #[instrument(skip_all, fields(threads = limits.threads))]
    pub fn init_coordinator(
        engine: &WasmEngine,
        module: &CompiledModule,
        limits: &PoolLimits,
        logger: Logger,
        kv: KvStore,
        spawner: Arc<dyn ThreadSpawner>,
    ) -> Result<Self, BridgeError> {
        let state = ContextState::new(Role::Coordinator, COORDINATOR_ID, logger, kv).with_spawner(spawner);
        let memory = MemorySource::Allocate {
            initial_pages: limits.initial_pages,
            max_pages: limits.max_pages,
            shared: limits.is_threaded(),
        };

        let mut instance = instantiate(engine, module, state, memory)?;
        instance.initialize()?;

        Ok(Self::from_instance(instance))
    }

    /// Instantiate a worker bound to the coordinator's memory.
    ///
    /// Does not allocate memory and does not run `_initialize`.
    ///
    /// # Errors
    ///
    /// Fails if the module cannot be instantiated against `setup.memory`.
    #[instrument(skip(setup, terminate))]
    pub fn init_member(context_id: &str, setup: ContextSetup, terminate: Arc<AtomicBool>) -> Result<Self, BridgeError> {
        let state = ContextState::new(Role::Worker, context_id, setup.logger, setup.kv)
            .with_spawner(setup.spawner)
            .with_terminate_flag(terminate);

        let instance = instantiate(&setup.engine, &setup.module, state, MemorySource::Existing(setup.memory))?;
        debug!("Worker instantiated");

        Ok(Self::from_instance(instance))
    }

    /// Wrap an already instantiated module.
    pub fn from_instance(instance: BridgeInstance) -> Self {
        Self {
            context_id: instance.context_id().to_string(),
            role: instance.role(),
            instance: Mutex::new(instance),
        }
    }

    /// Invoke export `name` on this thread.
    ///
    /// # Errors
    ///
    /// See [`BridgeInstance::call`].
    pub fn invoke(&self, name: &str, args: &[WasmArg]) -> Result<Option<u32>, BridgeError> {
        self.instance.lock().call(name, args)
    }

    /// Run a spawned thread on this thread.
    ///
    /// # Errors
    ///
    /// See [`BridgeInstance::start_thread`].
    pub fn start_thread(&self, thread_id: u32, arg: u32) -> Result<(), BridgeError> {
        self.instance.lock().start_thread(thread_id, arg)
    }

    /// Run `f` with exclusive access to the instance.
    pub fn with_instance<R>(&self, f: impl FnOnce(&mut BridgeInstance) -> R) -> R {
        f(&mut self.instance.lock())
    }

    /// The instance's memory region.
    ///
    /// # Errors
    ///
    /// Fails if no memory is attached.
    pub fn memory(&self) -> Result<MemoryRegion, BridgeError> {
        self.instance.lock().memory().cloned()
    }

    /// Mark the context terminated.
    pub fn shutdown(&self) {
        self.instance.lock().terminate();
    }
}

#[async_trait]
impl ExecutionContext for LocalContext {
    fn context_id(&self) -> &str {
        &self.context_id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn is_terminated(&self) -> bool {
        self.instance.lock().is_terminated()
    }

    async fn init_thread(&self, thread_id: u32, arg: u32) -> Result<(), BridgeError> {
        self.start_thread(thread_id, arg)
    }

    async fn call(&self, request: CallRequest) -> Result<Option<u32>, BridgeError> {
        self.invoke(&request.name, &request.args)
    }

    async fn destroy(&self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LocalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalContext")
            .field("context_id", &self.context_id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
