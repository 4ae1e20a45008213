//! Progress reporting for batch runs
//!
//! The engine reports through this trait so it does not depend on any
//! particular terminal UI.

use crate::types::{BatchSummary, ReconcileResult};

/// Progress callback for batch runs
///
/// With `jobs > 1` calls arrive from worker threads, serialized by the
/// runner, so implementations only need to be `Send`.
pub trait ProgressCallback: Send {
    /// Called once before any user is processed
    fn on_batch_start(&mut self, total: usize);

    /// Called when a user's reconciliation starts
    fn on_user_start(&mut self, user_name: &str, action: &str);

    /// Called when a user's reconciliation completes
    fn on_user_complete(&mut self, result: &ReconcileResult);

    /// Called once after the last user
    fn on_batch_complete(&mut self, summary: &BatchSummary);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_batch_start(&mut self, _total: usize) {}
    fn on_user_start(&mut self, _user_name: &str, _action: &str) {}
    fn on_user_complete(&mut self, _result: &ReconcileResult) {}
    fn on_batch_complete(&mut self, _summary: &BatchSummary) {}
}

/// Progress callback that logs each completed user
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_batch_start(&mut self, total: usize) {
        log::info!("Reconciling {} users", total);
    }

    fn on_user_start(&mut self, user_name: &str, action: &str) {
        log::debug!("{}: {}", user_name, action);
    }

    fn on_user_complete(&mut self, result: &ReconcileResult) {
        match &result.error {
            None => log::info!(
                "{}: {} ({} operations)",
                result.user_name,
                result.action,
                result.applied_operations.len()
            ),
            Some(error) => log::warn!("{}: {} failed: {}", result.user_name, result.action, error),
        }
    }

    fn on_batch_complete(&mut self, summary: &BatchSummary) {
        log::info!(
            "Batch done: {} succeeded, {} failed",
            summary.succeeded,
            summary.failed
        );
    }
}
