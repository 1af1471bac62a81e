//! Integration tests for wasm-bridge-host.
//!
//! Each test instantiates an inline WAT module against the full import
//! surface and drives it through `BridgeInstance::call`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio_test::{assert_err, assert_ok};

use wasm_bridge_common::{BridgeError, EngineConfig, WasmArg};
use wasm_bridge_core::{
    BridgeInstance, CompiledModule, ContextState, KvStore, LogBuffer, Logger, MemoryRegion, Role,
    ThreadSpawner, WasmEngine,
};
use wasm_bridge_host::{MemorySource, instantiate};

const PLAIN_WAT: &str = r#"
    (module
        (import "wasi_snapshot_preview1" "random_get" (func $random_get (param i32 i32) (result i32)))
        (import "wasi_snapshot_preview1" "clock_time_get" (func $clock_time_get (param i32 i64 i32) (result i32)))
        (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
        (import "wasi" "thread-spawn" (func $thread_spawn (param i32) (result i32)))
        (import "env" "env_hardware_concurrency" (func $hardware_concurrency (result i32)))
        (import "env" "logstr" (func $logstr (param i32)))
        (import "env" "get_data" (func $get_data (param i32 i32)))
        (import "env" "set_data" (func $set_data (param i32 i32 i32)))
        (import "env" "memory" (memory 16 32))

        (data (i32.const 0) "hello\00")
        (data (i32.const 16) "WARNING: careful\00")
        (data (i32.const 48) "foo\00")
        (data (i32.const 56) "nope\00")
        (data (i32.const 100) "\01\02\03")

        (func (export "log") (param i32) (call $logstr (local.get 0)))
        (func (export "random") (param i32 i32) (result i32)
            (call $random_get (local.get 0) (local.get 1)))
        (func (export "clock") (param i32) (result i32)
            (call $clock_time_get (i32.const 0) (i64.const 1) (local.get 0)))
        (func (export "exit") (call $proc_exit (i32.const 1)))
        (func (export "spawn") (param i32) (result i32) (call $thread_spawn (local.get 0)))
        (func (export "concurrency") (result i32) (call $hardware_concurrency))
        (func (export "get") (param i32 i32) (call $get_data (local.get 0) (local.get 1)))
        (func (export "set") (param i32 i32 i32)
            (call $set_data (local.get 0) (local.get 1) (local.get 2)))
    )
"#;

const SHARED_WAT: &str = r#"
    (module
        (import "env" "memory" (memory 1 4 shared))
        (func (export "store") (param i32 i32)
            (i32.atomic.store (local.get 0) (local.get 1)))
        (func (export "load") (param i32) (result i32)
            (i32.atomic.load (local.get 0)))
    )
"#;

/// Hands out ids from 1 and records every spawn argument.
struct RecordingSpawner {
    workers: usize,
    next_id: AtomicU32,
    args: Mutex<Vec<u32>>,
}

impl RecordingSpawner {
    fn new(workers: usize) -> Arc<Self> {
        Arc::new(Self {
            workers,
            next_id: AtomicU32::new(1),
            args: Mutex::new(Vec::new()),
        })
    }
}

impl ThreadSpawner for RecordingSpawner {
    fn spawn_thread(&self, arg: u32, _logger: &Logger) -> Result<u32, BridgeError> {
        self.args.lock().push(arg);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn worker_count(&self) -> usize {
        self.workers
    }
}

fn engine() -> WasmEngine {
    WasmEngine::new(&EngineConfig::default()).unwrap()
}

fn plain_instance(role: Role, spawner: Option<Arc<dyn ThreadSpawner>>) -> (BridgeInstance, LogBuffer, KvStore) {
    let engine = engine();
    let module = CompiledModule::from_wat(engine.inner(), PLAIN_WAT).unwrap();
    let (logger, buffer) = Logger::buffered();
    let kv = KvStore::new();

    let mut state = ContextState::new(role, "test", logger, kv.clone());
    if let Some(spawner) = spawner {
        state = state.with_spawner(spawner);
    }

    let memory = MemorySource::Allocate {
        initial_pages: 16,
        max_pages: 32,
        shared: false,
    };
    let instance = instantiate(&engine, &module, state, memory).unwrap();
    (instance, buffer, kv)
}

fn i32s(values: &[i32]) -> Vec<WasmArg> {
    values.iter().copied().map(WasmArg::I32).collect()
}

// ============================================================================
// Test: Logging
// ============================================================================

#[test]
fn test_logstr_appends_memory_size() {
    let (mut instance, buffer, _) = plain_instance(Role::Coordinator, None);

    assert_ok!(instance.call("log", &i32s(&[0])));

    assert_eq!(buffer.lines(), vec!["hello (mem: 1.00MiB)"]);
}

#[test]
fn test_logstr_warning_adds_backtrace() {
    let (mut instance, buffer, _) = plain_instance(Role::Coordinator, None);

    assert_ok!(instance.call("log", &i32s(&[16])));

    let lines = buffer.lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "WARNING: careful (mem: 1.00MiB)");
}

#[test]
fn test_logstr_unterminated_string_traps() {
    let (mut instance, _, _) = plain_instance(Role::Coordinator, None);
    let end = instance.memory_size().unwrap();
    instance.write_memory(end - 2, b"ab").unwrap();

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let err = assert_err!(instance.call("log", &i32s(&[(end - 2) as i32])));
    assert!(err.is_trap());
}

// ============================================================================
// Test: KV Exchange
// ============================================================================

#[test]
fn test_set_data_copies_out_of_memory() {
    let (mut instance, _, kv) = plain_instance(Role::Coordinator, None);

    // set("foo", 100, 3)
    assert_ok!(instance.call("set", &i32s(&[48, 100, 3])));
    assert_eq!(kv.get("foo"), Some(vec![1, 2, 3]));

    // Clobber the source; the stored value must not change
    instance.write_memory(100, &[0, 0, 0]).unwrap();
    assert_eq!(kv.get("foo"), Some(vec![1, 2, 3]));

    // get("foo", 200)
    assert_ok!(instance.call("get", &i32s(&[48, 200])));
    assert_eq!(instance.read_memory(200, 203).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_set_data_overwrites() {
    let (mut instance, _, kv) = plain_instance(Role::Coordinator, None);

    assert_ok!(instance.call("set", &i32s(&[48, 100, 3])));
    assert_ok!(instance.call("set", &i32s(&[48, 101, 1])));

    assert_eq!(kv.get("foo"), Some(vec![2]));
}

#[test]
fn test_get_data_reads_host_values() {
    let (mut instance, _, kv) = plain_instance(Role::Coordinator, None);
    kv.set("foo", vec![9, 8, 7, 6]);

    assert_ok!(instance.call("get", &i32s(&[48, 300])));
    assert_eq!(instance.read_memory(300, 304).unwrap(), vec![9, 8, 7, 6]);
}

#[test]
fn test_get_data_miss_writes_nothing() {
    let (mut instance, buffer, _) = plain_instance(Role::Coordinator, None);
    instance.write_memory(300, &[0xAA; 8]).unwrap();

    assert_ok!(instance.call("get", &i32s(&[56, 300])));

    assert_eq!(instance.read_memory(300, 308).unwrap(), vec![0xAA; 8]);
    assert!(buffer.contains("get_data miss nope"));
}

#[test]
fn test_set_data_out_of_bounds_traps() {
    let (mut instance, _, kv) = plain_instance(Role::Coordinator, None);

    let err = assert_err!(instance.call("set", &i32s(&[48, 100, -1])));
    assert!(err.is_trap());
    assert!(kv.is_empty());
}

// ============================================================================
// Test: WASI subset
// ============================================================================

#[test]
fn test_random_get_fills_buffer() {
    let (mut instance, _, _) = plain_instance(Role::Coordinator, None);

    let errno = assert_ok!(instance.call("random", &i32s(&[1024, 64])));
    assert_eq!(errno, Some(0));

    let bytes = instance.read_memory(1024, 1088).unwrap();
    assert!(bytes.iter().any(|&b| b != 0));
    // Neighbouring bytes untouched
    assert_eq!(instance.read_memory(1088, 1096).unwrap(), vec![0; 8]);
}

#[test]
fn test_clock_time_get_writes_nanoseconds() {
    let (mut instance, _, _) = plain_instance(Role::Coordinator, None);

    assert_ok!(instance.call("clock", &i32s(&[512])));

    let bytes: [u8; 8] = instance.read_memory(512, 520).unwrap().try_into().unwrap();
    let nanos = u64::from_le_bytes(bytes);
    assert!(nanos > 1_577_836_800_000_000_000, "timestamp {nanos} too old");
}

#[test]
fn test_proc_exit_terminates_worker() {
    let (mut instance, buffer, _) = plain_instance(Role::Worker, None);

    let err = assert_err!(instance.call("exit", &[]));
    assert!(err.is_terminated());
    assert!(buffer.contains("PANIC: proc_exit was called"));

    let err = assert_err!(instance.call("concurrency", &[]));
    assert!(err.is_terminated());
}

#[test]
fn test_proc_exit_on_coordinator_propagates() {
    let (mut instance, _, _) = plain_instance(Role::Coordinator, None);

    let err = assert_err!(instance.call("exit", &[]));
    assert!(err.is_trap());
    assert!(instance.is_terminated());
}

// ============================================================================
// Test: Thread control
// ============================================================================

#[test]
fn test_thread_spawn_without_spawner_traps() {
    let (mut instance, _, _) = plain_instance(Role::Coordinator, None);

    let err = assert_err!(instance.call("spawn", &i32s(&[64])));
    assert!(err.is_trap());
    assert!(err.to_string().contains("spawn"));
}

#[test]
fn test_thread_spawn_returns_assigned_ids() {
    let spawner = RecordingSpawner::new(2);
    let (mut instance, _, _) = plain_instance(Role::Coordinator, Some(spawner.clone()));

    assert_eq!(assert_ok!(instance.call("spawn", &i32s(&[64]))), Some(1));
    assert_eq!(assert_ok!(instance.call("spawn", &i32s(&[-8]))), Some(2));

    assert_eq!(*spawner.args.lock(), vec![64, u32::MAX - 7]);
}

#[test]
fn test_hardware_concurrency() {
    let (mut instance, _, _) = plain_instance(Role::Coordinator, None);
    assert_eq!(assert_ok!(instance.call("concurrency", &[])), Some(1));

    let (mut instance, _, _) = plain_instance(Role::Coordinator, Some(RecordingSpawner::new(3)));
    assert_eq!(assert_ok!(instance.call("concurrency", &[])), Some(4));

    // Workers stay single threaded even with a spawner attached
    let (mut instance, _, _) = plain_instance(Role::Worker, Some(RecordingSpawner::new(3)));
    assert_eq!(assert_ok!(instance.call("concurrency", &[])), Some(1));
}

// ============================================================================
// Test: Memory binding
// ============================================================================

#[test]
fn test_shared_memory_visible_across_instances() {
    let engine = engine();
    let module = CompiledModule::from_wat(engine.inner(), SHARED_WAT).unwrap();
    assert!(module.imports_shared_memory());

    let state = ContextState::new(Role::Coordinator, "coordinator", Logger::default(), KvStore::new());
    let memory = MemorySource::Allocate {
        initial_pages: 1,
        max_pages: 4,
        shared: true,
    };
    let mut coordinator = instantiate(&engine, &module, state, memory).unwrap();
    let region = coordinator.memory().unwrap().clone();

    let state = ContextState::new(Role::Worker, "worker-0", Logger::default(), KvStore::new());
    let mut worker = instantiate(&engine, &module, state, MemorySource::Existing(region)).unwrap();

    assert_ok!(coordinator.call("store", &i32s(&[8, 1234])));
    assert_eq!(assert_ok!(worker.call("load", &i32s(&[8]))), Some(1234));

    worker.write_memory(16, &5678_i32.to_le_bytes()).unwrap();
    assert_eq!(assert_ok!(coordinator.call("load", &i32s(&[16]))), Some(5678));
}

#[test]
fn test_existing_local_memory_rejected() {
    let engine = engine();
    let module = CompiledModule::from_wat(engine.inner(), PLAIN_WAT).unwrap();
    let mut scratch = wasmtime::Store::new(engine.inner(), ());
    let local = MemoryRegion::local(&mut scratch, 16, 32).unwrap();

    let state = ContextState::new(Role::Worker, "worker-0", Logger::default(), KvStore::new());
    let err = instantiate(&engine, &module, state, MemorySource::Existing(local)).unwrap_err();
    assert!(matches!(err, BridgeError::ModuleLoad { .. }));
}

#[test]
fn test_shared_module_rejects_plain_memory() {
    let engine = engine();
    let module = CompiledModule::from_wat(engine.inner(), SHARED_WAT).unwrap();

    let state = ContextState::new(Role::Coordinator, "coordinator", Logger::default(), KvStore::new());
    let memory = MemorySource::Allocate {
        initial_pages: 1,
        max_pages: 4,
        shared: false,
    };
    let err = instantiate(&engine, &module, state, memory).unwrap_err();
    assert!(matches!(err, BridgeError::ModuleLoad { .. }));
}
