//! Progress and log notification interface.
//!
//! The core emits events; a separate presentation layer (CLI, GUI, web)
//! renders them. Sinks are pure notification targets: no return values, and a
//! no-op sink is always valid, so nothing here may fail.

/// A single progress notification.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressReport {
    /// Overall completion, 0–100.
    pub percent: f32,
    /// Human-readable description of the current sub-step.
    pub label: String,
}

impl ProgressReport {
    /// Create a new progress report.
    pub fn new(percent: f32, label: impl Into<String>) -> Self {
        Self {
            percent,
            label: label.into(),
        }
    }
}

/// Receiver for progress and log events produced during a session.
///
/// Implementations must tolerate any call pattern; events are transient and
/// not persisted by the core.
pub trait EventSink {
    /// Overall progress changed.
    fn on_progress(&mut self, percent: f32, label: &str);

    /// A log line was produced.
    fn on_log(&mut self, message: &str);
}

/// Sink that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_progress(&mut self, _percent: f32, _label: &str) {}

    fn on_log(&mut self, _message: &str) {}
}
