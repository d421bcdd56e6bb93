//! Progress event emission with a completion-driven, non-decreasing percent.

use std::sync::{Arc, Mutex};

use crate::{LogKind, ProgressEvent, ProgressRange};

/// Callback receiving progress events. Must not block indefinitely.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Sink that drops every event.
pub fn discard() -> ProgressSink {
    Arc::new(|_| {})
}

/// Shared by all workers of one enrichment run.
///
/// The completed-lookup count and the emission both happen under one lock, so
/// events reach the sink with a non-decreasing percent even when workers
/// finish concurrently.
pub struct ProgressReporter {
    sink: ProgressSink,
    step: u32,
    range: ProgressRange,
    total_lookups: usize,
    completed: Mutex<usize>,
}

impl ProgressReporter {
    pub fn new(sink: ProgressSink, step: u32, range: ProgressRange, total_lookups: usize) -> Self {
        Self {
            sink,
            step,
            range,
            total_lookups,
            completed: Mutex::new(0),
        }
    }

    /// Emit at the current percent without counting a completion.
    pub fn emit(&self, kind: LogKind, message: impl Into<String>) {
        let done = self.completed.lock().unwrap_or_else(|e| e.into_inner());
        let percent = self.range.at(*done, self.total_lookups);
        (self.sink)(self.event(percent, kind, message.into()));
    }

    /// Count one finished lookup and emit at the new percent.
    ///
    /// `message` receives the percent so it can be quoted in the line.
    pub fn complete(&self, kind: LogKind, message: impl FnOnce(u8) -> String) {
        let mut done = self.completed.lock().unwrap_or_else(|e| e.into_inner());
        *done += 1;
        let percent = self.range.at(*done, self.total_lookups);
        (self.sink)(self.event(percent, kind, message(percent)));
    }

    /// Emit at the end of the range.
    pub fn finish(&self, kind: LogKind, message: impl Into<String>) {
        let _guard = self.completed.lock().unwrap_or_else(|e| e.into_inner());
        (self.sink)(self.event(self.range.end, kind, message.into()));
    }

    pub fn completed(&self) -> usize {
        *self.completed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn event(&self, percent: u8, kind: LogKind, message: String) -> ProgressEvent {
        ProgressEvent {
            percent,
            step: self.step,
            message,
            kind,
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("step", &self.step)
            .field("range", &self.range)
            .field("total_lookups", &self.total_lookups)
            .field("completed", &self.completed())
            .finish()
    }
}
