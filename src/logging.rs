//! Logging sinks
//!
//! Capture code never raises for degraded outcomes; it reports through a
//! [`LogSink`]. Messages carry the [`LOG_TAG`] component prefix followed by
//! bracketed sub-tags such as `[load][failed]`.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Component prefix for every message emitted by this crate.
pub const LOG_TAG: &str = "[rfshot]";

/// Prefix of worker stdout lines carrying a debug event.
pub const DEBUG_PREFIX: &str = "debug: ";

/// Prefix of worker stdout lines carrying an error event.
pub const ERROR_PREFIX: &str = "error: ";

/// Severity of a relayed log event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Error,
}

/// A single log event as seen by a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

impl LogEvent {
    pub fn debug(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Debug, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Error, message: message.into() }
    }
}

/// Destination for debug and error events.
pub trait LogSink: Send + Sync {
    fn debug(&self, message: &str);
    fn error(&self, message: &str);

    fn emit(&self, event: &LogEvent) {
        match event.level {
            LogLevel::Debug => self.debug(&event.message),
            LogLevel::Error => self.error(&event.message),
        }
    }
}

/// Forwards events to the `log` facade under the `rfshot` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn debug(&self, message: &str) {
        log::debug!(target: "rfshot", "{}", message);
    }

    fn error(&self, message: &str) {
        log::error!(target: "rfshot", "{}", message);
    }
}

/// Writes `debug: ` / `error: ` prefixed lines to stdout.
///
/// This is the worker side of the process contract: the host relays these
/// lines back into its own sink. Multi-line messages are split so every
/// physical line keeps its prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl StdoutSink {
    fn write(prefix: &str, message: &str) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for line in message.lines() {
            let _ = writeln!(out, "{}{}", prefix, line);
        }
        let _ = out.flush();
    }
}

impl LogSink for StdoutSink {
    fn debug(&self, message: &str) {
        Self::write(DEBUG_PREFIX, message);
    }

    fn error(&self, message: &str) {
        Self::write(ERROR_PREFIX, message);
    }
}

/// Records events in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Messages recorded at `level`
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level)
            .map(|e| e.message)
            .collect()
    }

    /// Number of events at `level` whose message contains `needle`
    pub fn count(&self, level: LogLevel, needle: &str) -> usize {
        self.messages(level).iter().filter(|m| m.contains(needle)).count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn push(&self, event: LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl LogSink for MemorySink {
    fn debug(&self, message: &str) {
        self.push(LogEvent::debug(message));
    }

    fn error(&self, message: &str) {
        self.push(LogEvent::error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_counts_by_level() {
        let sink = MemorySink::new();
        sink.debug("[rfshot][load][started] a");
        sink.error("[rfshot][load][failed] a");
        sink.error("[rfshot][load][failed] b");
        assert_eq!(sink.count(LogLevel::Error, "[load][failed]"), 2);
        assert_eq!(sink.count(LogLevel::Debug, "[load][failed]"), 0);
        assert_eq!(sink.events().len(), 3);
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
