use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

/// One event on the shared notification channel. Fire-and-forget; the
/// engine never waits for acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: String,
    pub current_value: String,
    pub message: String,
    pub instance: String,
    pub severity: Severity,
    pub tags: HashMap<String, String>,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: AlertEvent);
}

/// Sink that forwards events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: AlertEvent) {
        match event.severity {
            Severity::Info => tracing::info!(
                kind = %event.kind,
                instance = %event.instance,
                value = %event.current_value,
                "{}",
                event.message
            ),
            Severity::Warning => tracing::warn!(
                kind = %event.kind,
                instance = %event.instance,
                value = %event.current_value,
                "{}",
                event.message
            ),
            Severity::Error => tracing::error!(
                kind = %event.kind,
                instance = %event.instance,
                value = %event.current_value,
                "{}",
                event.message
            ),
        }
    }
}

/// Sink that records every event in memory, for assertions in tests and
/// for the diagnostics endpoint of an embedding process.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AlertEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<AlertEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: AlertEvent) {
        self.events.lock().unwrap().push(event);
    }
}
