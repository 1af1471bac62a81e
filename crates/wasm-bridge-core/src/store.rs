//! Per-context execution state and store management.
//!
//! This module provides:
//! - [`ContextState`]: State reachable from host functions through [`wasmtime::Caller`]
//! - [`Role`]: Whether a context is the pool coordinator or a worker
//! - [`ThreadSpawner`]: The seam through which `thread-spawn` reaches the pool
//! - [`create_store`]: Store construction with epoch-based termination

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;
use wasmtime::{Store, StoreContextMut, UpdateDeadline};

use wasm_bridge_common::BridgeError;

use crate::{KvStore, Logger, MemoryRegion, WasmEngine};

/// The part a context plays in its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The context that allocated the pool and runs `_initialize`.
    Coordinator,
    /// A context that runs spawned threads and worker calls.
    Worker,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Coordinator => write!(f, "coordinator"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

/// Routes `thread-spawn` requests to the pool's worker contexts.
///
/// Implemented by the pool's thread coordinator. Every context of a pool
/// holds the same spawner, but only the coordinator advertises it through
/// [`ContextState::hardware_concurrency`].
pub trait ThreadSpawner: Send + Sync {
    /// Assign a thread id for `arg` and start it on a worker without waiting.
    ///
    /// `logger` receives any later dispatch failure.
    ///
    /// # Errors
    ///
    /// Fails only when no id can be assigned (no workers, ids exhausted).
    fn spawn_thread(&self, arg: u32, logger: &Logger) -> Result<u32, BridgeError>;

    /// Number of worker contexts currently in the pool.
    fn worker_count(&self) -> usize;
}

/// State of one execution context.
///
/// Host functions reach this through `caller.data()`. The memory region is
/// attached after the store exists because store-owned memory needs the store
/// to be created.
pub struct ContextState {
    role: Role,
    context_id: String,
    logger: Logger,
    memory: Option<MemoryRegion>,
    kv: KvStore,
    spawner: Option<Arc<dyn ThreadSpawner>>,
    exit_requested: bool,
    terminate: Arc<AtomicBool>,
}

impl ContextState {
    /// Create the state for a context.
    pub fn new(role: Role, context_id: impl Into<String>, logger: Logger, kv: KvStore) -> Self {
        Self {
            role,
            context_id: context_id.into(),
            logger,
            memory: None,
            kv,
            spawner: None,
            exit_requested: false,
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach the pool's thread spawner.
    #[must_use]
    pub fn with_spawner(mut self, spawner: Arc<dyn ThreadSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Share an externally owned termination flag.
    ///
    /// Whoever holds the flag can stop this context from another thread.
    #[must_use]
    pub fn with_terminate_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.terminate = flag;
        self
    }

    /// Attach the memory region bound to this context's instance.
    pub fn attach_memory(&mut self, memory: MemoryRegion) {
        self.memory = Some(memory);
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn memory(&self) -> Option<&MemoryRegion> {
        self.memory.as_ref()
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    pub fn spawner(&self) -> Option<&Arc<dyn ThreadSpawner>> {
        self.spawner.as_ref()
    }

    /// Threads the guest may use, as reported by `env_hardware_concurrency`.
    ///
    /// The coordinator sees every worker plus itself. A worker always sees 1
    /// so code already running on a worker stays single threaded; a child
    /// routed back to its own busy worker would never start.
    pub fn hardware_concurrency(&self) -> usize {
        match self.role {
            Role::Coordinator => self.spawner.as_ref().map_or(0, |s| s.worker_count()) + 1,
            Role::Worker => 1,
        }
    }

    /// Record that the guest called `proc_exit`.
    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    /// Whether the guest called `proc_exit`.
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Mark the context terminated. Running guest code stops at its next
    /// epoch check; further calls are refused.
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// The flag shared with whoever may terminate this context.
    pub fn terminate_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }
}

impl std::fmt::Debug for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextState")
            .field("role", &self.role)
            .field("context_id", &self.context_id)
            .field("has_memory", &self.memory.is_some())
            .field("has_spawner", &self.spawner.is_some())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

/// Create a new Wasmtime store for a context.
///
/// With epoch interruption enabled, every epoch increment on the engine makes
/// the guest check its termination flag: a terminated context traps, any
/// other keeps running.
pub fn create_store(engine: &WasmEngine, state: ContextState) -> Store<ContextState> {
    let mut store = Store::new(engine.inner(), state);

    if engine.is_epoch_enabled() {
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(|ctx: StoreContextMut<'_, ContextState>| {
            let state = ctx.data();
            if state.is_terminated() {
                debug!(context = state.context_id(), "Interrupting terminated context");
                return Err(BridgeError::terminated(state.context_id()).into());
            }
            Ok(UpdateDeadline::Continue(1))
        });
    }

    store
}
