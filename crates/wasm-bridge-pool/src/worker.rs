//! Worker contexts on dedicated OS threads.
//!
//! [`WorkerClient::spawn`] starts a thread that instantiates the module
//! against the pool's shared memory, then serves [`WorkerRequest`]s one at a
//! time. The client is the stub the coordinator holds: it implements
//! [`ExecutionContext`] by sending requests over an unbounded channel and
//! awaiting oneshot replies.
//!
//! Termination is immediate. The client closes the channel, sets the
//! context's termination flag and bumps the engine epoch, which traps guest
//! code that is still running. Queued requests are rejected, not drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use wasm_bridge_common::BridgeError;
use wasm_bridge_core::{Logger, Role, WasmEngine};

use crate::context::{ContextSetup, ExecutionContext, LocalContext};
use crate::protocol::{CallRequest, Reply, WorkerRequest};

/// Client side of a worker context.
pub struct WorkerClient {
    index: usize,
    context_id: String,
    sender: Mutex<Option<mpsc::UnboundedSender<WorkerRequest>>>,
    terminate: Arc<AtomicBool>,
    engine: WasmEngine,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Resolves once a worker finished instantiating.
pub struct PendingInit {
    index: usize,
    rx: oneshot::Receiver<Result<(), BridgeError>>,
}

impl PendingInit {
    /// Wait for the worker's instantiation result.
    ///
    /// # Errors
    ///
    /// Returns the worker's instantiation error, or
    /// [`BridgeError::ModuleLoad`] if the worker exited without reporting.
    pub async fn wait(self) -> Result<(), BridgeError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::module_load(format!(
                "worker {} exited during initialization",
                self.index
            ))),
        }
    }
}

impl WorkerClient {
    /// Start worker `index` and begin its instantiation.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the OS thread cannot be created.
    pub fn spawn(index: usize, setup: ContextSetup) -> Result<(Self, PendingInit), BridgeError> {
        let context_id = format!("worker-{index}");
        let (tx, rx) = mpsc::unbounded_channel();
        let (init_tx, init_rx) = oneshot::channel();
        let terminate = Arc::new(AtomicBool::new(false));
        let engine = setup.engine.clone();

        let handle = thread::Builder::new().name(context_id.clone()).spawn({
            let context_id = context_id.clone();
            let terminate = Arc::clone(&terminate);
            move || run_worker(index, &context_id, setup, terminate, init_tx, rx)
        })?;

        debug!(worker = index, "Worker thread started");

        let client = Self {
            index,
            context_id,
            sender: Mutex::new(Some(tx)),
            terminate,
            engine,
            thread: Mutex::new(Some(handle)),
        };
        Ok((client, PendingInit { index, rx: init_rx }))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Queue a request. Hands it back if the worker is gone.
    pub fn dispatch(&self, request: WorkerRequest) -> Result<(), WorkerRequest> {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(request).map_err(|e| e.0),
            None => Err(request),
        }
    }

    /// Start a spawned thread without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ContextTerminated`] if the worker is gone.
    /// Failures after the request was queued only reach `logger`.
    pub fn dispatch_detached(&self, thread_id: u32, arg: u32, logger: Logger) -> Result<(), BridgeError> {
        let request = WorkerRequest::StartThread {
            thread_id,
            arg,
            reply: Reply::Detached { logger, thread_id },
        };
        self.dispatch(request)
            .map_err(|_| BridgeError::terminated(&self.context_id))
    }

    /// Terminate the worker immediately. Idempotent.
    pub fn terminate(&self) {
        if self.terminate.swap(true, Ordering::SeqCst) {
            return;
        }

        // Closing the channel ends the worker loop once the current request returns
        self.sender.lock().take();
        self.engine.increment_epoch();
        // Detach; a guest blocked outside wasm code must not hold up teardown
        self.thread.lock().take();

        info!(worker = self.index, "Worker terminated");
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> WorkerRequest) -> Result<T, BridgeError> {
        let (reply, rx) = Reply::awaited();
        self.dispatch(make(reply))
            .map_err(|_| BridgeError::terminated(&self.context_id))?;

        rx.await
            .unwrap_or_else(|_| Err(BridgeError::terminated(&self.context_id)))
    }
}

#[async_trait]
impl ExecutionContext for WorkerClient {
    fn context_id(&self) -> &str {
        &self.context_id
    }

    fn role(&self) -> Role {
        Role::Worker
    }

    fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    async fn init_thread(&self, thread_id: u32, arg: u32) -> Result<(), BridgeError> {
        self.request(|reply| WorkerRequest::StartThread { thread_id, arg, reply })
            .await
    }

    async fn call(&self, request: CallRequest) -> Result<Option<u32>, BridgeError> {
        self.request(|reply| WorkerRequest::Call { request, reply }).await
    }

    async fn destroy(&self) {
        self.terminate();
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for WorkerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerClient")
            .field("context_id", &self.context_id)
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

fn run_worker(
    index: usize,
    context_id: &str,
    setup: ContextSetup,
    terminate: Arc<AtomicBool>,
    init_tx: oneshot::Sender<Result<(), BridgeError>>,
    mut rx: mpsc::UnboundedReceiver<WorkerRequest>,
) {
    let context = match LocalContext::init_member(context_id, setup, terminate) {
        Ok(context) => context,
        Err(e) => {
            error!(worker = index, error = %e, "Worker failed to instantiate");
            let _ = init_tx.send(Err(e));
            return;
        }
    };
    let _ = init_tx.send(Ok(()));
    debug!(worker = index, "Worker ready");

    while let Some(request) = rx.blocking_recv() {
        if context.is_terminated() {
            request.reject(index, BridgeError::terminated(context_id));
            break;
        }

        match request {
            WorkerRequest::StartThread { thread_id, arg, reply } => {
                reply.send(index, context.start_thread(thread_id, arg));
            }
            WorkerRequest::Call { request, reply } => {
                reply.send(index, context.invoke(&request.name, &request.args));
            }
        }

        if context.is_terminated() {
            warn!(worker = index, "Worker context terminated");
            break;
        }
    }

    rx.close();
    while let Ok(request) = rx.try_recv() {
        debug!(worker = index, request = %request.describe(), "Rejecting queued request");
        request.reject(index, BridgeError::terminated(context_id));
    }

    debug!(worker = index, "Worker thread exiting");
}
