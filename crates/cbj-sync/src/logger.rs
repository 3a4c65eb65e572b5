//! Step logging capability for the orchestrator.

use serde_json::Value;
use tracing::{error, info, warn};

/// Structured step logger. Implementations must not fail or block.
pub trait StepLogger: Send + Sync {
    fn info(&self, message: &str, context: &Value);
    fn warn(&self, message: &str, context: &Value);
    fn error(&self, message: &str, context: &Value);
}

/// Used when no logger is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStepLogger;

impl StepLogger for NoopStepLogger {
    fn info(&self, _message: &str, _context: &Value) {}
    fn warn(&self, _message: &str, _context: &Value) {}
    fn error(&self, _message: &str, _context: &Value) {}
}

/// Forwards steps to `tracing` with the context rendered as one JSON field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStepLogger;

impl StepLogger for TracingStepLogger {
    fn info(&self, message: &str, context: &Value) {
        info!(target: "cbj_sync::step", context = %context, "{message}");
    }

    fn warn(&self, message: &str, context: &Value) {
        warn!(target: "cbj_sync::step", context = %context, "{message}");
    }

    fn error(&self, message: &str, context: &Value) {
        error!(target: "cbj_sync::step", context = %context, "{message}");
    }
}
