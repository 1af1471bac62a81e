//! Host functions for modules running on wasm-bridge.
//!
//! This crate provides the host side of the import contract a bridged module
//! is compiled against, and [`instantiate`], which links it together with the
//! pool's memory region.
//!
//! # Interfaces
//!
//! - [`wasi`]: Randomness, wall clock and `proc_exit`
//! - [`threads`]: `thread-spawn` and hardware concurrency
//! - [`logging`]: Guest log lines
//! - [`exchange`]: KV exchange store access
//!
//! # Failure model
//!
//! A host function that returns an error traps the calling guest. Errors that
//! must not interrupt the guest (a KV miss, a failed spawn dispatch) are
//! logged and swallowed.

pub mod exchange;
pub mod instantiate;
pub mod linker;
pub mod logging;
pub mod threads;
pub mod wasi;

pub use instantiate::{MemorySource, instantiate};
pub use linker::register_all;
