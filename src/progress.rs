//! Progress indicators for the iamsync CLI.

use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{BatchSummary, ProgressCallback, ReconcileResult};
use std::time::Duration;

/// Spinner for a single long-running step
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Progress bar for a reconciliation batch
pub struct BatchProgress {
    bar: ProgressBar,
}

impl BatchProgress {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Default for BatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCallback for BatchProgress {
    fn on_batch_start(&mut self, total: usize) {
        self.bar = ProgressBar::new(total as u64);
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
    }

    fn on_user_start(&mut self, user_name: &str, action: &str) {
        self.bar.set_message(format!("{user_name} ({action})"));
    }

    fn on_user_complete(&mut self, result: &ReconcileResult) {
        let mark = if result.succeeded { "✓" } else { "✗" };
        self.bar.set_message(format!("{} {}", result.user_name, mark));
        self.bar.inc(1);
    }

    fn on_batch_complete(&mut self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}
