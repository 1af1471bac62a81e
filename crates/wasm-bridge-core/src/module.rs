//! WebAssembly module loading and compilation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! that handles compilation, serialization and deserialization, plus
//! [`ModuleSource`], which knows where the two build variants of a module live.
//!
//! # Variants
//!
//! A module declares in its imports whether its memory is shared, so a pool
//! needs two builds of the same code:
//! - **Plain**: non-shared memory, used when the pool has a single context
//! - **Threads**: shared memory and `thread-spawn`, used for every larger pool

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, ExternType, Module};

use wasm_bridge_common::{BridgeError, ModuleConfig};

/// Export invoked once on the coordinator after instantiation.
pub const INITIALIZE_EXPORT: &str = "_initialize";

/// Export invoked on a worker to run a spawned thread: `(id: i32, arg: i32)`.
pub const THREAD_START_EXPORT: &str = "wasi_thread_start";

/// Extension of precompiled artifacts.
const PRECOMPILED_EXTENSION: &str = "cwasm";

/// Which build of the module a pool needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleVariant {
    /// Non-shared memory.
    Plain,
    /// Shared memory with thread spawning.
    Threads,
}

impl ModuleVariant {
    /// The variant for a pool of `threads` contexts.
    pub fn for_threads(threads: u32) -> Self {
        if threads > 1 {
            ModuleVariant::Threads
        } else {
            ModuleVariant::Plain
        }
    }

    /// Whether this variant expects shared memory.
    pub fn is_shared(self) -> bool {
        self == ModuleVariant::Threads
    }
}

impl std::fmt::Display for ModuleVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleVariant::Plain => write!(f, "plain"),
            ModuleVariant::Threads => write!(f, "threads"),
        }
    }
}

/// Where to load the two module variants from.
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// Files on disk. `.cwasm` files are loaded as precompiled artifacts.
    Files { plain: PathBuf, threads: PathBuf },
    /// Raw WebAssembly binaries.
    Bytes { plain: Vec<u8>, threads: Vec<u8> },
    /// WebAssembly text.
    Wat { plain: String, threads: String },
}

impl ModuleSource {
    /// Same WAT for both variants, for modules that never spawn threads.
    pub fn wat(source: impl Into<String>) -> Self {
        let source = source.into();
        ModuleSource::Wat {
            plain: source.clone(),
            threads: source,
        }
    }

    /// Load and compile the requested variant.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ModuleLoad`] if the variant cannot be read or compiled.
    pub fn load(&self, engine: &Engine, variant: ModuleVariant) -> Result<CompiledModule, BridgeError> {
        debug!(%variant, "Loading module variant");
        match self {
            ModuleSource::Files { plain, threads } => {
                let path = match variant {
                    ModuleVariant::Plain => plain,
                    ModuleVariant::Threads => threads,
                };
                CompiledModule::from_file(engine, path)
            }
            ModuleSource::Bytes { plain, threads } => {
                let bytes = match variant {
                    ModuleVariant::Plain => plain,
                    ModuleVariant::Threads => threads,
                };
                CompiledModule::from_bytes(engine, bytes)
            }
            ModuleSource::Wat { plain, threads } => {
                let wat = match variant {
                    ModuleVariant::Plain => plain,
                    ModuleVariant::Threads => threads,
                };
                CompiledModule::from_wat(engine, wat)
            }
        }
    }
}

impl From<&ModuleConfig> for ModuleSource {
    fn from(config: &ModuleConfig) -> Self {
        ModuleSource::Files {
            plain: PathBuf::from(&config.plain),
            threads: PathBuf::from(&config.threads),
        }
    }
}

/// A compiled WebAssembly module.
///
/// This struct wraps a Wasmtime [`Module`] with metadata for caching and
/// debugging purposes.
///
/// # Thread Safety
///
/// `CompiledModule` is cheap to clone and can be instantiated on any thread.
/// Every context of a pool instantiates the same compiled module.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Hash of the original Wasm bytes.
    content_hash: String,

    /// When this module was compiled.
    compiled_at: Instant,
}

impl CompiledModule {
    /// Compile a module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails (e.g., invalid Wasm).
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, BridgeError> {
        let start = Instant::now();

        // Validate Wasm magic number
        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes)
            .map_err(|e| BridgeError::module_load(format!("Module compilation failed: {e}")))?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(Self::wrap(module, content_hash))
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, BridgeError> {
        let start = Instant::now();

        let module = Module::new(engine, wat)
            .map_err(|e| BridgeError::module_load(format!("WAT compilation failed: {e}")))?;

        let content_hash = compute_hash(wat.as_bytes());

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT module compiled"
        );

        Ok(Self::wrap(module, content_hash))
    }

    /// Load a pre-compiled module from disk.
    ///
    /// # Safety
    ///
    /// Deserializes machine code. Only load artifacts produced by
    /// [`CompiledModule::serialize`] with the same Wasmtime version and engine
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be loaded or is incompatible.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, path))]
    pub fn from_precompiled(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let start = Instant::now();

        // SAFETY: artifacts are produced by `serialize` on a compatible engine
        let module = unsafe { Module::deserialize_file(engine, path) }.map_err(|e| {
            BridgeError::module_load(format!(
                "Failed to load precompiled module from {}: {e}",
                path.display()
            ))
        })?;

        let content_hash = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        debug!(
            path = %path.display(),
            content_hash = %content_hash,
            duration_us = start.elapsed().as_micros(),
            "Precompiled module loaded"
        );

        Ok(Self::wrap(module, content_hash))
    }

    /// Load a module file, choosing the loader by extension and contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or compiled.
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        if path.extension().is_some_and(|ext| ext == PRECOMPILED_EXTENSION) {
            return Self::from_precompiled(engine, path);
        }

        let bytes = std::fs::read(path).map_err(|e| {
            BridgeError::module_load(format!("Failed to read module {}: {e}", path.display()))
        })?;

        if bytes.starts_with(b"\0asm") {
            Self::from_bytes(engine, &bytes)
        } else {
            let wat = String::from_utf8(bytes).map_err(|_| {
                BridgeError::module_load(format!(
                    "{} is neither a Wasm binary nor UTF-8 text",
                    path.display()
                ))
            })?;
            Self::from_wat(engine, &wat)
        }
    }

    /// Serialize the compiled module for AOT caching.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>, BridgeError> {
        self.inner
            .serialize()
            .map_err(|e| BridgeError::module_load(format!("Module serialization failed: {e}")))
    }

    /// Get the content hash of the original Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Names of every exported item.
    pub fn exports(&self) -> Vec<String> {
        self.inner.exports().map(|e| e.name().to_string()).collect()
    }

    /// Whether the module exports `name`.
    pub fn has_export(&self, name: &str) -> bool {
        self.inner.get_export(name).is_some()
    }

    /// Whether the module imports a shared memory.
    pub fn imports_shared_memory(&self) -> bool {
        self.inner
            .imports()
            .any(|import| matches!(import.ty(), ExternType::Memory(ty) if ty.is_shared()))
    }

    fn wrap(inner: Module, content_hash: String) -> Self {
        Self {
            inner,
            content_hash,
            compiled_at: Instant::now(),
        }
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), BridgeError> {
        if bytes.len() < 8 {
            return Err(BridgeError::module_load("Invalid Wasm: file too small"));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(BridgeError::module_load("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .field("shared_memory", &self.imports_shared_memory())
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WasmEngine;
    use wasm_bridge_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    const SHARED_WAT: &str = r#"
        (module
            (import "env" "memory" (memory 1 4 shared))
            (func (export "_initialize"))
        )
    "#;

    const PLAIN_WAT: &str = r#"
        (module
            (import "env" "memory" (memory 1 4))
            (func (export "_initialize"))
            (func (export "compute") (result i32) i32.const 7)
        )
    "#;

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_validate_wasm_header() {
        assert!(CompiledModule::validate_wasm_header(MINIMAL_WASM).is_ok());
        assert!(CompiledModule::validate_wasm_header(&[0x00, 0x61]).is_err());

        let bad_wasm = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        assert!(CompiledModule::validate_wasm_header(bad_wasm).is_err());
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_variant_for_threads() {
        assert_eq!(ModuleVariant::for_threads(1), ModuleVariant::Plain);
        assert_eq!(ModuleVariant::for_threads(2), ModuleVariant::Threads);
        assert_eq!(ModuleVariant::for_threads(32), ModuleVariant::Threads);
        assert!(ModuleVariant::Threads.is_shared());
        assert!(!ModuleVariant::Plain.is_shared());
    }

    #[test]
    fn test_source_selects_variant() {
        let engine = engine();
        let source = ModuleSource::Wat {
            plain: PLAIN_WAT.into(),
            threads: SHARED_WAT.into(),
        };

        let plain = source.load(engine.inner(), ModuleVariant::Plain).unwrap();
        assert!(!plain.imports_shared_memory());
        assert!(plain.has_export("compute"));

        let threads = source.load(engine.inner(), ModuleVariant::Threads).unwrap();
        assert!(threads.imports_shared_memory());
        assert!(!threads.has_export("compute"));
    }

    #[test]
    fn test_exports_listing() {
        let engine = engine();
        let module = CompiledModule::from_wat(engine.inner(), PLAIN_WAT).unwrap();

        let exports = module.exports();
        assert!(exports.contains(&INITIALIZE_EXPORT.to_string()));
        assert!(exports.contains(&"compute".to_string()));
    }

    #[test]
    fn test_bytes_source_rejects_garbage() {
        let engine = engine();
        let source = ModuleSource::Bytes {
            plain: vec![1, 2, 3],
            threads: vec![],
        };

        let err = source.load(engine.inner(), ModuleVariant::Plain).unwrap_err();
        assert!(matches!(err, BridgeError::ModuleLoad { .. }));
    }

    #[test]
    fn test_missing_file() {
        let engine = engine();
        let err = CompiledModule::from_file(engine.inner(), "/no/such/module.wasm").unwrap_err();
        assert!(matches!(err, BridgeError::ModuleLoad { .. }));
    }

    #[test]
    fn test_serialize_roundtrip_via_file() {
        let engine = engine();
        let module = CompiledModule::from_wat(engine.inner(), PLAIN_WAT).unwrap();
        let bytes = module.serialize().unwrap();

        let path = std::env::temp_dir().join(format!("{}.cwasm", module.content_hash()));
        std::fs::write(&path, bytes).unwrap();

        let loaded = CompiledModule::from_file(engine.inner(), &path).unwrap();
        assert_eq!(loaded.content_hash(), module.content_hash());
        assert!(loaded.has_export("compute"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_module_debug() {
        let engine = engine();
        let module = CompiledModule::from_bytes(engine.inner(), MINIMAL_WASM).unwrap();

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("CompiledModule"));
        assert!(debug_str.contains("content_hash"));
    }
}
