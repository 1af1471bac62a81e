//! Thread-spawn routing.
//!
//! The [`ThreadCoordinator`] is the [`ThreadSpawner`] every context of a
//! threaded pool holds. A spawn request gets the next thread id and the next
//! worker in round-robin order, is queued on that worker, and the id goes
//! straight back to the guest. Whatever happens to the queued start
//! afterwards is only logged.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use wasm_bridge_common::{BridgeError, HostFunctionError};
use wasm_bridge_core::{Logger, ThreadSpawner};

use crate::protocol::report_dispatch_failure;
use crate::worker::WorkerClient;

/// Largest thread id handed to a guest. Ids travel back as `i32`.
pub const MAX_THREAD_ID: u32 = i32::MAX.unsigned_abs();

/// Id counter and round-robin cursor.
#[derive(Debug, Clone)]
pub struct SpawnCursor {
    next_thread_id: u32,
    next_worker: usize,
    limit: u32,
}

impl SpawnCursor {
    pub fn new() -> Self {
        Self::with_limit(MAX_THREAD_ID)
    }

    /// Cursor that stops issuing ids after `limit`.
    pub fn with_limit(limit: u32) -> Self {
        Self {
            next_thread_id: 1,
            next_worker: 0,
            limit: limit.min(MAX_THREAD_ID),
        }
    }

    /// The assignment the next spawn would get, without taking it.
    pub fn peek(&self, workers: usize) -> Option<(u32, usize)> {
        if workers == 0 || self.next_thread_id > self.limit {
            return None;
        }
        Some((self.next_thread_id, self.next_worker % workers))
    }

    /// Take the next (thread id, worker index) pair.
    ///
    /// # Errors
    ///
    /// [`HostFunctionError::SpawnUnavailable`] with no workers,
    /// [`HostFunctionError::ThreadIdsExhausted`] once the limit is passed.
    pub fn assign(&mut self, workers: usize) -> Result<(u32, usize), HostFunctionError> {
        if workers == 0 {
            return Err(HostFunctionError::SpawnUnavailable);
        }
        let assignment = self
            .peek(workers)
            .ok_or(HostFunctionError::ThreadIdsExhausted { limit: self.limit })?;

        self.next_thread_id += 1;
        self.next_worker = self.next_worker.wrapping_add(1);
        Ok(assignment)
    }

    /// Ids handed out so far.
    pub fn issued(&self) -> u32 {
        self.next_thread_id - 1
    }
}

impl Default for SpawnCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes `thread-spawn` requests to worker contexts.
///
/// Starts empty; the pool installs its workers once every one of them has
/// finished instantiating.
#[derive(Debug, Default)]
pub struct ThreadCoordinator {
    cursor: Mutex<SpawnCursor>,
    workers: RwLock<Vec<Arc<WorkerClient>>>,
}

impl ThreadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_limit(limit: u32) -> Self {
        Self {
            cursor: Mutex::new(SpawnCursor::with_limit(limit)),
            workers: RwLock::new(Vec::new()),
        }
    }

    /// Make `workers` the spawn targets.
    pub fn install(&self, workers: Vec<Arc<WorkerClient>>) {
        debug!(workers = workers.len(), "Installing spawn targets");
        *self.workers.write() = workers;
    }

    /// Remove and return every spawn target.
    pub fn take_workers(&self) -> Vec<Arc<WorkerClient>> {
        std::mem::take(&mut *self.workers.write())
    }

    /// The (thread id, worker index) the next spawn would get.
    pub fn next_assignment(&self) -> Option<(u32, usize)> {
        let workers = self.workers.read().len();
        self.cursor.lock().peek(workers)
    }

    /// Thread ids issued so far.
    pub fn issued(&self) -> u32 {
        self.cursor.lock().issued()
    }
}

impl ThreadSpawner for ThreadCoordinator {
    fn spawn_thread(&self, arg: u32, logger: &Logger) -> Result<u32, BridgeError> {
        // Held across assignment and dispatch so ids reach workers in order
        let workers = self.workers.read();
        let (thread_id, index) = self.cursor.lock().assign(workers.len())?;
        debug!(thread_id, worker = index, arg, "Spawning thread");

        if let Err(e) = workers[index].dispatch_detached(thread_id, arg, logger.clone()) {
            report_dispatch_failure(logger, thread_id, index, &e);
        }
        Ok(thread_id)
    }

    fn worker_count(&self) -> usize {
        self.workers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let mut cursor = SpawnCursor::new();
        let ids: Vec<u32> = (0..10).map(|_| cursor.assign(3).unwrap().0).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        assert_eq!(cursor.issued(), 10);
    }

    #[test]
    fn test_round_robin_routing() {
        for workers in 1..=5 {
            let mut cursor = SpawnCursor::new();
            for k in 0..20 {
                let (_, index) = cursor.assign(workers).unwrap();
                assert_eq!(index, k % workers);
            }
        }
    }

    #[test]
    fn test_two_spawns_two_workers() {
        let mut cursor = SpawnCursor::new();
        assert_eq!(cursor.assign(2).unwrap(), (1, 0));
        assert_eq!(cursor.assign(2).unwrap(), (2, 1));
        assert_eq!(cursor.peek(2), Some((3, 0)));
    }

    #[test]
    fn test_no_workers() {
        let mut cursor = SpawnCursor::new();
        assert!(matches!(cursor.assign(0), Err(HostFunctionError::SpawnUnavailable)));
        assert_eq!(cursor.peek(0), None);
        // A refused spawn consumes nothing
        assert_eq!(cursor.issued(), 0);
    }

    #[test]
    fn test_id_exhaustion_is_fatal() {
        let mut cursor = SpawnCursor::with_limit(2);
        cursor.assign(1).unwrap();
        cursor.assign(1).unwrap();

        let err = cursor.assign(1).unwrap_err();
        assert!(matches!(err, HostFunctionError::ThreadIdsExhausted { limit: 2 }));
        assert!(cursor.assign(1).is_err());
        assert_eq!(cursor.issued(), 2);
    }

    #[test]
    fn test_limit_capped_at_i32_max() {
        let cursor = SpawnCursor::with_limit(u32::MAX);
        assert_eq!(cursor.limit, MAX_THREAD_ID);
        assert_eq!(MAX_THREAD_ID, 2_147_483_647);
    }

    #[test]
    fn test_coordinator_without_workers() {
        let coordinator = ThreadCoordinator::new();
        let (logger, _buffer) = Logger::buffered();

        assert_eq!(coordinator.worker_count(), 0);
        assert_eq!(coordinator.next_assignment(), None);

        let err = coordinator.spawn_thread(64, &logger).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::HostFunction(HostFunctionError::SpawnUnavailable)
        ));
        assert!(coordinator.take_workers().is_empty());
    }
}
