//! Pluggable log sinks for guest-originated log lines.
//!
//! A [`Logger`] receives every line the bridge emits on behalf of a guest:
//! `logstr` output, KV misses, trap diagnostics, spawn dispatch failures. Each
//! execution context holds its own clone, so worker contexts can be given a
//! different sink than the coordinator.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

type Sink = Arc<dyn Fn(&str) + Send + Sync>;

/// A cloneable line sink.
#[derive(Clone)]
pub struct Logger {
    sink: Sink,
}

impl Logger {
    /// Wrap an arbitrary sink function.
    pub fn new(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Forward lines to `tracing`, tagged with `context`.
    pub fn tracing(context: impl Into<String>) -> Self {
        let context = context.into();
        Self::new(move |line| info!(context = %context, guest_log = true, "{}", line))
    }

    /// A logger that records every line, plus the buffer to read them back.
    pub fn buffered() -> (Self, LogBuffer) {
        let buffer = LogBuffer::default();
        let lines = Arc::clone(&buffer.lines);
        let logger = Self::new(move |line| lines.lock().push(line.to_string()));
        (logger, buffer)
    }

    /// Emit one line.
    pub fn log(&self, line: &str) {
        (self.sink)(line);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing("wasm")
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

/// Lines captured by a [`Logger::buffered`] sink.
#[derive(Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogBuffer {
    /// Snapshot of every captured line.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Whether any captured line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }

    /// Number of captured lines.
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Whether nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Discard captured lines.
    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBuffer").field("lines", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_buffered_logger() {
        let (logger, buffer) = Logger::buffered();
        assert!(buffer.is_empty());

        logger.log("first");
        logger.clone().log("second line");

        assert_eq!(buffer.lines(), vec!["first", "second line"]);
        assert!(buffer.contains("second"));
        assert!(!buffer.contains("third"));

        buffer.clear();
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_custom_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let logger = Logger::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        logger.log("a");
        logger.log("b");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_logger_does_not_panic() {
        Logger::default().log("to tracing");
        Logger::tracing("worker-0").log("to tracing");
    }
}
