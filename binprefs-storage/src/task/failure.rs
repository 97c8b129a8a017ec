//! Pluggable sink for failures of background tasks.

use binprefs_core::{PrefsError, StoreName};
use std::fmt;
use tracing::error;

/// Receives every failure raised by a task on a store's executor.
///
/// Called on the worker thread. A panicking handler is contained and does
/// not stop the worker.
pub trait FailureHandler: Send + Sync {
    fn on_failure(&self, store: &StoreName, task: &str, error: &PrefsError);
}

impl<F> FailureHandler for F
where
    F: Fn(&StoreName, &str, &PrefsError) + Send + Sync,
{
    fn on_failure(&self, store: &StoreName, task: &str, error: &PrefsError) {
        self(store, task, error)
    }
}

/// Default handler: report through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingFailureHandler;

impl FailureHandler for LoggingFailureHandler {
    fn on_failure(&self, store: &StoreName, task: &str, error: &PrefsError) {
        error!(
            store = %store,
            task,
            kind = ?error.kind(),
            error = %error,
            "Background task failed"
        );
    }
}

/// Drops failures silently.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreFailureHandler;

impl FailureHandler for IgnoreFailureHandler {
    fn on_failure(&self, _store: &StoreName, _task: &str, _error: &PrefsError) {}
}

impl fmt::Debug for dyn FailureHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FailureHandler")
    }
}
