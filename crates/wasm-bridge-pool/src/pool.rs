//! Pool lifecycle: initialization, calls and teardown.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use wasm_bridge_common::{BridgeConfig, BridgeError, EngineConfig, PoolConfig, PoolLimits, WasmArg};
use wasm_bridge_core::{CompiledModule, KvStore, Logger, ModuleSource, ModuleVariant, ThreadSpawner, WasmEngine};

use crate::context::{ContextSetup, ExecutionContext, LocalContext};
use crate::coordinator::ThreadCoordinator;
use crate::protocol::CallRequest;
use crate::worker::WorkerClient;

/// Everything [`BridgePool::init`] needs besides the module.
#[derive(Debug, Clone, Default)]
pub struct PoolOptions {
    /// Thread count and memory bounds.
    pub pool: PoolConfig,
    /// Engine settings.
    pub engine: EngineConfig,
    /// Sink for the coordinator's guest log lines and pool lifecycle lines.
    pub logger: Logger,
    /// Sink for worker log lines. Falls back to `logger`.
    pub worker_logger: Option<Logger>,
}

impl PoolOptions {
    /// Options for an explicit thread count.
    pub fn with_threads(threads: u32) -> Self {
        Self {
            pool: PoolConfig::with_threads(threads),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_memory_pages(mut self, initial_pages: u32, max_pages: u32) -> Self {
        self.pool = self.pool.with_memory_pages(initial_pages, max_pages);
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn with_worker_logger(mut self, logger: Logger) -> Self {
        self.worker_logger = Some(logger);
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

impl From<&BridgeConfig> for PoolOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            pool: config.pool.clone(),
            engine: config.engine.clone(),
            ..Default::default()
        }
    }
}

/// One coordinator plus `threads - 1` workers over a single memory region.
///
/// The coordinator runs on the caller's thread. Workers run on their own OS
/// threads and are reached through [`ExecutionContext`]. Guest threads spawned
/// through `wasi.thread-spawn` are routed to the workers by the pool's
/// [`ThreadCoordinator`].
pub struct BridgePool {
    engine: WasmEngine,
    module: CompiledModule,
    limits: PoolLimits,
    coordinator: LocalContext,
    threads: Arc<ThreadCoordinator>,
    workers: Vec<Arc<WorkerClient>>,
    kv: KvStore,
    logger: Logger,
    destroyed: bool,
}

impl BridgePool {
    /// Build a pool and wait until every context is instantiated.
    ///
    /// Picks the threaded module variant when more than one thread is
    /// requested, allocates the memory region, runs `_initialize` on the
    /// coordinator, then instantiates the workers against the same region.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Capacity`] if the thread count or memory bounds are invalid
    /// - [`BridgeError::ModuleLoad`] if the module cannot be loaded or any
    ///   context fails to instantiate. Workers already started are terminated.
    #[instrument(skip_all)]
    pub async fn init(source: &ModuleSource, options: PoolOptions) -> Result<Self, BridgeError> {
        let limits = options.pool.validate()?;
        let logger = options.logger;

        logger.log(&format!(
            "initial mem: {} pages, {}MiB. max mem: {} pages, {}MiB. threads: {}",
            limits.initial_pages,
            limits.initial_mib(),
            limits.max_pages,
            limits.max_mib(),
            limits.threads
        ));

        let engine = WasmEngine::new(&options.engine)?;
        let variant = ModuleVariant::for_threads(limits.threads);
        let module = source.load(engine.inner(), variant)?;
        info!(%variant, hash = module.content_hash(), "Module loaded");

        let kv = KvStore::new();
        let threads = Arc::new(ThreadCoordinator::new());
        let spawner: Arc<dyn ThreadSpawner> = threads.clone();
        let coordinator = LocalContext::init_coordinator(
            &engine,
            &module,
            &limits,
            logger.clone(),
            kv.clone(),
            Arc::clone(&spawner),
        )?;

        logger.log("creating worker threads...");
        let setup = ContextSetup {
            engine: engine.clone(),
            module: module.clone(),
            memory: coordinator.memory()?,
            kv: kv.clone(),
            logger: options.worker_logger.unwrap_or_else(|| logger.clone()),
            spawner,
        };
        let workers = spawn_workers(limits.worker_count(), &setup).await?;
        threads.install(workers.clone());

        logger.log("init complete.");
        info!(threads = limits.threads, workers = workers.len(), "Pool initialized");

        Ok(Self {
            engine,
            module,
            limits,
            coordinator,
            threads,
            workers,
            kv,
            logger,
            destroyed: false,
        })
    }

    /// A single-context pool with default memory bounds.
    ///
    /// # Errors
    ///
    /// See [`BridgePool::init`].
    pub async fn solo(source: &ModuleSource) -> Result<Self, BridgeError> {
        Self::init(source, PoolOptions::with_threads(1)).await
    }

    /// Total execution contexts, coordinator included.
    pub fn thread_count(&self) -> usize {
        self.workers.len() + 1
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Invoke an export on the coordinator.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ExportNotFound`] for an unknown export and
    /// [`BridgeError::RuntimeTrap`] if the call traps.
    #[instrument(skip(self, args))]
    pub fn call(&self, name: &str, args: &[WasmArg]) -> Result<Option<u32>, BridgeError> {
        self.coordinator.invoke(name, args)
    }

    /// Invoke an export on worker `index`.
    ///
    /// A trap terminates that worker and surfaces as
    /// [`BridgeError::ContextTerminated`].
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidArgument`] if there is no worker `index`, otherwise
    /// whatever the worker reports.
    pub async fn call_on_worker(&self, index: usize, name: &str, args: &[WasmArg]) -> Result<Option<u32>, BridgeError> {
        let worker = self
            .workers
            .get(index)
            .ok_or_else(|| BridgeError::invalid_argument(format!("no worker {index} in a pool of {}", self.workers.len())))?;
        worker.call(CallRequest::new(name, args.to_vec())).await
    }

    /// Worker `index` as an execution context.
    pub fn worker(&self, index: usize) -> Option<&dyn ExecutionContext> {
        self.workers.get(index).map(|w| w.as_ref() as &dyn ExecutionContext)
    }

    pub fn coordinator(&self) -> &LocalContext {
        &self.coordinator
    }

    /// The store backing `get_data` and `set_data`.
    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    pub fn memory_size(&self) -> Result<usize, BridgeError> {
        self.coordinator.with_instance(|instance| instance.memory_size())
    }

    pub fn read_memory(&self, start: usize, end: usize) -> Result<Vec<u8>, BridgeError> {
        self.coordinator.with_instance(|instance| instance.read_memory(start, end))
    }

    pub fn write_memory(&self, offset: usize, bytes: &[u8]) -> Result<(), BridgeError> {
        self.coordinator
            .with_instance(|instance| instance.write_memory(offset, bytes))
    }

    pub fn read_cstring(&self, addr: usize) -> Result<String, BridgeError> {
        self.coordinator.with_instance(|instance| instance.read_cstring(addr))
    }

    pub fn thread_coordinator(&self) -> &Arc<ThreadCoordinator> {
        &self.threads
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Terminate every worker immediately.
    ///
    /// In-flight worker calls fail with [`BridgeError::ContextTerminated`],
    /// as does every later call to a worker. The coordinator stays usable.
    /// Safe to call more than once and on pools without workers.
    ///
    /// Each worker is torn down through [`ExecutionContext::destroy`]. Dropping
    /// the pool does the same synchronously.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }

        // No new spawns may land on a worker being torn down
        let installed = self.threads.take_workers();
        for worker in &self.workers {
            worker.destroy().await;
        }
        drop(installed);

        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        // Spawn routing holds its own handles; release them with the workers
        let installed = self.threads.take_workers();
        for worker in &self.workers {
            worker.terminate();
        }
        drop(installed);

        if !self.workers.is_empty() {
            self.logger.log("destroyed worker threads.");
        }
        info!(workers = self.workers.len(), "Pool destroyed");
    }
}

impl Drop for BridgePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BridgePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgePool")
            .field("limits", &self.limits)
            .field("workers", &self.workers.len())
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

/// Start `count` workers and wait for all of them to instantiate.
///
/// On failure the returned-early `Vec` is dropped, which terminates every
/// worker started so far.
async fn spawn_workers(count: usize, setup: &ContextSetup) -> Result<Vec<Arc<WorkerClient>>, BridgeError> {
    let mut workers = Vec::with_capacity(count);
    let mut pending = Vec::with_capacity(count);

    for index in 0..count {
        let (client, init) = WorkerClient::spawn(index, setup.clone())?;
        workers.push(Arc::new(client));
        pending.push(init);
    }

    // All workers instantiate in parallel; this only collects the results
    for init in pending {
        init.wait().await?;
    }

    debug!(workers = workers.len(), "All workers instantiated");
    Ok(workers)
}
