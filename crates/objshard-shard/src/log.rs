//! Observability hook for listing drivers.

use std::sync::Mutex;

/// Log sink injected into listings.
pub trait ListingLog: Send + Sync {
    fn debug(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Forwards to `tracing` under the `objshard::listing` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLog;

impl ListingLog for TracingLog {
    fn debug(&self, msg: &str) {
        tracing::debug!(target: "objshard::listing", "{msg}");
    }

    fn warn(&self, msg: &str) {
        tracing::warn!(target: "objshard::listing", "{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!(target: "objshard::listing", "{msg}");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
}

/// Keeps every message in memory. Useful for asserting on listing behaviour.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().expect("log lock poisoned").clone()
    }

    /// Messages logged at `level`.
    pub fn at(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .lock()
            .expect("log lock poisoned")
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn push(&self, level: LogLevel, msg: &str) {
        self.lines
            .lock()
            .expect("log lock poisoned")
            .push((level, msg.to_string()));
    }
}

impl ListingLog for MemoryLog {
    fn debug(&self, msg: &str) {
        self.push(LogLevel::Debug, msg);
    }

    fn warn(&self, msg: &str) {
        self.push(LogLevel::Warn, msg);
    }

    fn error(&self, msg: &str) {
        self.push(LogLevel::Error, msg);
    }
}
