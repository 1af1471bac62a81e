//! Worker pool and lifecycle for wasm-bridge.
//!
//! A [`BridgePool`] runs one module across several execution contexts that
//! share a single memory region:
//! - the coordinator, a [`LocalContext`] on the caller's thread, which runs
//!   `_initialize` and serves [`BridgePool::call`]
//! - `threads - 1` workers, each a [`LocalContext`] on a dedicated OS thread
//!   behind a [`WorkerClient`] stub
//!
//! Both sides implement [`ExecutionContext`], so a caller holding a
//! `&dyn ExecutionContext` cannot tell local from remote invocation.
//! Guest calls to `wasi.thread-spawn` go through the [`ThreadCoordinator`],
//! which assigns thread ids and picks workers round-robin.
//!
//! # Example
//!
//! ```ignore
//! use wasm_bridge_core::ModuleSource;
//! use wasm_bridge_pool::{BridgePool, PoolOptions};
//!
//! let source = ModuleSource::Files {
//!     plain: "compute.wasm".into(),
//!     threads: "compute-threads.wasm".into(),
//! };
//! let mut pool = BridgePool::init(&source, PoolOptions::with_threads(4)).await?;
//! let result = pool.call("run", &[])?;
//! pool.destroy().await;
//! ```

pub mod context;
pub mod coordinator;
pub mod pool;
pub mod protocol;
pub mod worker;

pub use context::{COORDINATOR_ID, ContextSetup, ExecutionContext, LocalContext};
pub use coordinator::{MAX_THREAD_ID, SpawnCursor, ThreadCoordinator};
pub use pool::{BridgePool, PoolOptions};
pub use protocol::{CallRequest, Reply, WorkerRequest, report_dispatch_failure};
pub use worker::{PendingInit, WorkerClient};
