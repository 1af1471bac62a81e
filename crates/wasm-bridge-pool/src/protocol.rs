//! Messages exchanged between the coordinator and worker contexts.
//!
//! Every operation on a worker is a [`WorkerRequest`] sent over the worker's
//! channel. Each request carries a [`Reply`]: either a oneshot sender the
//! caller awaits, or a detached marker for fire-and-forget dispatch, in which
//! case failures can only be logged.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::warn;

use wasm_bridge_common::{BridgeError, HostFunctionError, WasmArg};
use wasm_bridge_core::Logger;

/// A named export invocation.
///
/// Serializable so calls can be described in configuration or on the command
/// line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Export name.
    pub name: String,
    /// Arguments, checked against the export's signature.
    #[serde(default)]
    pub args: Vec<WasmArg>,
}

impl CallRequest {
    pub fn new(name: impl Into<String>, args: Vec<WasmArg>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// How a worker reports the outcome of a request.
pub enum Reply<T> {
    /// The caller awaits the result.
    Await(oneshot::Sender<Result<T, BridgeError>>),
    /// Nobody awaits; failures go to `logger`.
    Detached { logger: Logger, thread_id: u32 },
}

impl<T> Reply<T> {
    /// A reply the caller awaits, with the receiving half.
    pub fn awaited() -> (Self, oneshot::Receiver<Result<T, BridgeError>>) {
        let (tx, rx) = oneshot::channel();
        (Reply::Await(tx), rx)
    }

    /// Deliver `result` from worker `worker`.
    pub fn send(self, worker: usize, result: Result<T, BridgeError>) {
        match self {
            // The caller may have stopped waiting
            Reply::Await(tx) => {
                let _ = tx.send(result);
            }
            Reply::Detached { logger, thread_id } => {
                if let Err(e) = result {
                    report_dispatch_failure(&logger, thread_id, worker, &e);
                }
            }
        }
    }
}

/// A request to a worker context.
pub enum WorkerRequest {
    /// Run `wasi_thread_start(thread_id, arg)`.
    StartThread {
        thread_id: u32,
        arg: u32,
        reply: Reply<()>,
    },
    /// Invoke an export.
    Call {
        request: CallRequest,
        reply: Reply<Option<u32>>,
    },
}

impl WorkerRequest {
    /// Name for logs.
    pub fn describe(&self) -> String {
        match self {
            WorkerRequest::StartThread { thread_id, .. } => format!("thread {thread_id}"),
            WorkerRequest::Call { request, .. } => format!("call {}", request.name),
        }
    }

    /// Fail the request without running it.
    pub fn reject(self, worker: usize, error: BridgeError) {
        match self {
            WorkerRequest::StartThread { reply, .. } => reply.send(worker, Err(error)),
            WorkerRequest::Call { reply, .. } => reply.send(worker, Err(error)),
        }
    }
}

/// Log a spawned thread that never ran, or ran and failed.
pub fn report_dispatch_failure(logger: &Logger, thread_id: u32, worker: usize, error: &BridgeError) {
    let failure = HostFunctionError::SpawnDispatch {
        thread_id,
        worker,
        reason: error.to_string(),
    };
    logger.log(&failure.to_string());
    warn!(thread_id, worker, error = %error, "Spawned thread failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_request_serde() {
        let request = CallRequest::new("prove", vec![WasmArg::I32(16), WasmArg::I64(-2)]);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"name":"prove","args":[{"type":"i32","value":16},{"type":"i64","value":-2}]}"#
        );

        let parsed: CallRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);

        let bare: CallRequest = serde_json::from_str(r#"{"name":"noop"}"#).unwrap();
        assert!(bare.args.is_empty());
    }

    #[tokio::test]
    async fn test_awaited_reply_delivers_result() {
        let (reply, rx) = Reply::<Option<u32>>::awaited();
        reply.send(0, Ok(Some(5)));
        assert_eq!(rx.await.unwrap().unwrap(), Some(5));
    }

    #[test]
    fn test_detached_reply_logs_failure_only() {
        let (logger, buffer) = Logger::buffered();

        let reply: Reply<()> = Reply::Detached {
            logger: logger.clone(),
            thread_id: 3,
        };
        reply.send(1, Ok(()));
        assert!(buffer.is_empty());

        let reply: Reply<()> = Reply::Detached { logger, thread_id: 4 };
        reply.send(1, Err(BridgeError::terminated("worker-1")));
        assert!(buffer.contains("Failed to start thread 4 on worker 1"));
    }

    #[tokio::test]
    async fn test_reject_fails_awaited_request() {
        let (reply, rx) = Reply::awaited();
        let request = WorkerRequest::Call {
            request: CallRequest::new("f", vec![]),
            reply,
        };
        assert_eq!(request.describe(), "call f");

        request.reject(2, BridgeError::terminated("worker-2"));
        assert!(rx.await.unwrap().unwrap_err().is_terminated());
    }
}
