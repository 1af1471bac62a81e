//! The pool's linear memory region and its access primitives.
//!
//! A pool owns exactly one [`MemoryRegion`]:
//! - [`MemoryRegion::Shared`] for multi-threaded pools. Every context binds the
//!   same Wasmtime [`SharedMemory`], so writes from one context are visible to
//!   all others.
//! - [`MemoryRegion::Local`] for solo pools. The memory lives inside the
//!   coordinator's store.
//!
//! Growth can move the backing buffer, so none of the primitives here hold on
//! to a view. Each call re-acquires [`MemoryRegion::current_view`] from the
//! store it is given.

use std::cell::UnsafeCell;

use wasmtime::{AsContext, AsContextMut, Extern, Memory, MemoryType, SharedMemory};

use wasm_bridge_common::{BridgeError, WASM_PAGE_SIZE};

use crate::WasmEngine;

/// The linear memory bound to every instance of a pool.
#[derive(Clone)]
pub enum MemoryRegion {
    /// Shared memory visible to every execution context.
    Shared(SharedMemory),
    /// Store-owned memory of a single-context pool.
    Local(Memory),
}

/// A borrowed view over the current backing buffer.
///
/// Only valid until the region next grows.
pub enum MemoryView<'a> {
    /// Cells of a shared memory. Other contexts may write them concurrently.
    Shared(&'a [UnsafeCell<u8>]),
    /// Bytes of a store-owned memory.
    Local(&'a [u8]),
}

impl MemoryRegion {
    /// Allocate a shared region of `initial_pages`, growable up to `max_pages`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ModuleLoad`] if Wasmtime refuses the allocation.
    pub fn shared(engine: &WasmEngine, initial_pages: u32, max_pages: u32) -> Result<Self, BridgeError> {
        let ty = MemoryType::shared(initial_pages, max_pages);
        SharedMemory::new(engine.inner(), ty)
            .map(Self::Shared)
            .map_err(|e| BridgeError::module_load(format!("Failed to allocate shared memory: {e}")))
    }

    /// Allocate a store-owned region of `initial_pages`, growable up to `max_pages`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ModuleLoad`] if Wasmtime refuses the allocation.
    pub fn local(store: impl AsContextMut, initial_pages: u32, max_pages: u32) -> Result<Self, BridgeError> {
        let ty = MemoryType::new(initial_pages, Some(max_pages));
        Memory::new(store, ty)
            .map(Self::Local)
            .map_err(|e| BridgeError::module_load(format!("Failed to allocate memory: {e}")))
    }

    /// Whether this region can be handed to other execution contexts.
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    /// The region as a linker definition for the `env.memory` import.
    pub fn as_extern(&self) -> Extern {
        match self {
            Self::Shared(memory) => Extern::SharedMemory(memory.clone()),
            Self::Local(memory) => Extern::Memory(*memory),
        }
    }

    /// Current size in bytes.
    pub fn size(&self, store: impl AsContext) -> usize {
        match self {
            Self::Shared(memory) => memory.data_size(),
            Self::Local(memory) => memory.data_size(store),
        }
    }

    /// Current size in pages.
    pub fn pages(&self, store: impl AsContext) -> u64 {
        match self {
            Self::Shared(memory) => memory.size(),
            Self::Local(memory) => memory.size(store),
        }
    }

    /// Declared maximum in pages.
    pub fn max_pages(&self, store: impl AsContext) -> Option<u64> {
        match self {
            Self::Shared(memory) => memory.ty().maximum(),
            Self::Local(memory) => memory.ty(store).maximum(),
        }
    }

    /// Current size in MiB, as reported in guest log lines.
    #[allow(clippy::cast_precision_loss)]
    pub fn size_mib(&self, store: impl AsContext) -> f64 {
        self.size(store) as f64 / (1024.0 * 1024.0)
    }

    /// A fresh view over the current backing buffer.
    pub fn current_view<'a, S>(&'a self, store: &'a S) -> MemoryView<'a>
    where
        S: AsContext,
        S::Data: 'a,
    {
        match self {
            Self::Shared(memory) => MemoryView::Shared(memory.data()),
            Self::Local(memory) => MemoryView::Local(memory.data(store.as_context())),
        }
    }

    /// Copy `[start, end)` out of the region.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemoryAccess`] if the range is inverted or out of bounds.
    pub fn slice(&self, store: impl AsContext, start: usize, end: usize) -> Result<Vec<u8>, BridgeError> {
        self.current_view(&store).copy_range(start, end)
    }

    /// Copy `bytes` into the region at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemoryAccess`] if the write would run past the end.
    pub fn write(&self, mut store: impl AsContextMut, offset: usize, bytes: &[u8]) -> Result<(), BridgeError> {
        let len = self.size(&store);
        let end = checked_end(offset, bytes.len(), len)?;

        match self {
            Self::Shared(memory) => {
                let cells = &memory.data()[offset..end];
                // SAFETY: the range is in bounds and `UnsafeCell<u8>` has the
                // layout of `u8`. Concurrent guest access is unsynchronised, as
                // it is for the guest's own stores to shared memory.
                #[allow(unsafe_code)]
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        bytes.as_ptr(),
                        UnsafeCell::raw_get(cells.as_ptr()),
                        bytes.len(),
                    );
                }
            }
            Self::Local(memory) => {
                memory.data_mut(store.as_context_mut())[offset..end].copy_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// Decode the NUL-terminated string at `addr`.
    ///
    /// Each byte maps to one `char`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemoryAccess`] if `addr` is out of bounds or no
    /// terminator is found before the end of the region.
    pub fn read_cstring(&self, store: impl AsContext, addr: usize) -> Result<String, BridgeError> {
        let view = self.current_view(&store);
        if addr >= view.len() {
            return Err(BridgeError::memory_access(format!(
                "string address {addr} outside memory of {} bytes",
                view.len()
            )));
        }
        let end = view.find_nul(addr).ok_or_else(|| {
            BridgeError::memory_access(format!("string at {addr} is not NUL-terminated"))
        })?;
        let bytes = view.copy_range(addr, end)?;
        Ok(bytes.into_iter().map(char::from).collect())
    }

    /// Grow the region by `delta` pages, returning the previous size in pages.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Capacity`] if the region would exceed its maximum.
    pub fn grow(&self, mut store: impl AsContextMut, delta: u64) -> Result<u64, BridgeError> {
        let current = self.pages(&store);
        if let Some(max) = self.max_pages(&store) {
            if current.saturating_add(delta) > max {
                return Err(BridgeError::capacity(format!(
                    "growing memory by {delta} pages would exceed the maximum of {max} pages"
                )));
            }
        }

        let grown = match self {
            Self::Shared(memory) => memory.grow(delta),
            Self::Local(memory) => memory.grow(store.as_context_mut(), delta),
        };
        grown.map_err(|e| BridgeError::capacity(format!("memory growth failed: {e}")))
    }
}

impl MemoryView<'_> {
    /// Length of the viewed buffer in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Shared(cells) => cells.len(),
            Self::Local(bytes) => bytes.len(),
        }
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `[start, end)` into an owned buffer.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemoryAccess`] if the range is inverted or out of bounds.
    pub fn copy_range(&self, start: usize, end: usize) -> Result<Vec<u8>, BridgeError> {
        if start > end {
            return Err(BridgeError::memory_access(format!("inverted range [{start}, {end})")));
        }
        checked_end(start, end - start, self.len())?;

        match self {
            Self::Shared(cells) => {
                let cells = &cells[start..end];
                let mut out = vec![0u8; cells.len()];
                // SAFETY: in bounds, same layout as `u8`.
                #[allow(unsafe_code)]
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        UnsafeCell::raw_get(cells.as_ptr()).cast_const(),
                        out.as_mut_ptr(),
                        cells.len(),
                    );
                }
                Ok(out)
            }
            Self::Local(bytes) => Ok(bytes[start..end].to_vec()),
        }
    }

    /// Index of the first zero byte at or after `from`.
    pub fn find_nul(&self, from: usize) -> Option<usize> {
        let pos = match self {
            Self::Shared(cells) => cells.get(from..)?.iter().position(|cell| {
                // SAFETY: single-byte read of a live cell.
                #[allow(unsafe_code)]
                let byte = unsafe { *cell.get() };
                byte == 0
            }),
            Self::Local(bytes) => bytes.get(from..)?.iter().position(|&b| b == 0),
        };
        pos.map(|pos| from + pos)
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared(memory) => f
                .debug_struct("MemoryRegion::Shared")
                .field("pages", &memory.size())
                .field("max_pages", &memory.ty().maximum())
                .finish(),
            Self::Local(_) => f.debug_struct("MemoryRegion::Local").finish_non_exhaustive(),
        }
    }
}

/// Bytes per page, as `usize`.
pub fn page_bytes() -> usize {
    usize::try_from(WASM_PAGE_SIZE).unwrap_or(usize::MAX)
}

fn checked_end(offset: usize, len: usize, memory_len: usize) -> Result<usize, BridgeError> {
    match offset.checked_add(len) {
        Some(end) if end <= memory_len => Ok(end),
        _ => Err(BridgeError::memory_access(format!(
            "access of {len} bytes at {offset} exceeds memory of {memory_len} bytes"
        ))),
    }
}
