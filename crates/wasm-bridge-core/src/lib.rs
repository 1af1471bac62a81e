//! Core Wasmtime runtime for wasm-bridge.
//!
//! This crate provides the per-context building blocks of a pool:
//! - [`WasmEngine`]: Wasmtime engine with shared memory and epoch interruption
//! - [`CompiledModule`] and [`ModuleSource`]: Loading the plain or threaded module build
//! - [`MemoryRegion`]: The pool's linear memory and its access primitives
//! - [`ContextState`]: Per-context state reachable from host functions
//! - [`CallDispatcher`]: Export invocation with a role-dependent [`FailurePolicy`]
//! - [`BridgeInstance`]: Store + instance + dispatcher for one context
//! - [`KvStore`] and [`Logger`]: Shared exchange store and guest log sinks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (One per pool, thread-safe)                            │
//! │  - wasm threads                                         │
//! │  - epoch interruption for teardown                      │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  (Plain or Threads variant, shared by every context)    │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │     Store<ContextState> + Instance  (per context)       │
//! │  - role (coordinator / worker)                          │
//! │  - MemoryRegion (same shared buffer in every context)   │
//! │  - KvStore, Logger, ThreadSpawner                       │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod dispatch;
pub mod engine;
pub mod instance;
pub mod kv;
pub mod logger;
pub mod memory;
pub mod module;
pub mod store;

pub use dispatch::{CallDispatcher, FailurePolicy};
pub use engine::WasmEngine;
pub use instance::BridgeInstance;
pub use kv::KvStore;
pub use logger::{LogBuffer, Logger};
pub use memory::{MemoryRegion, MemoryView};
pub use module::{CompiledModule, INITIALIZE_EXPORT, ModuleSource, ModuleVariant, THREAD_START_EXPORT};
pub use store::{ContextState, Role, ThreadSpawner, create_store};
