//! Bounded polling with exponential backoff.
//!
//! Used only for the credential report, which IAM generates asynchronously.
//! Mutations are never retried.

use crate::error::{Error, Result};
use crate::types::PollConfig;
use std::thread;
use std::time::{Duration, Instant};

/// Callback trait for poll progress notifications.
pub trait PollCallback {
    /// Called before sleeping between polls.
    ///
    /// # Arguments
    /// * `attempt` - Number of polls performed so far (1-indexed)
    /// * `elapsed` - Time spent waiting so far
    /// * `delay` - Time until the next poll
    fn on_wait(&self, attempt: u32, elapsed: Duration, delay: Duration);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl PollCallback for NoCallback {
    fn on_wait(&self, _attempt: u32, _elapsed: Duration, _delay: Duration) {}
}

/// Callback that reports waits through the `log` facade.
pub struct LogCallback;

impl PollCallback for LogCallback {
    fn on_wait(&self, attempt: u32, elapsed: Duration, delay: Duration) {
        log::info!(
            "Credential report not ready after poll {} ({:.1}s elapsed), next poll in {:.1}s",
            attempt,
            elapsed.as_secs_f64(),
            delay.as_secs_f64()
        );
    }
}

/// Run `operation` until it stops reporting "not ready".
///
/// Any error other than [`Error::ReportNotReady`] is returned immediately.
/// When the poll budget (`timeout` or `max_polls`) is exhausted, returns
/// [`Error::ReportTimeout`].
pub fn poll_until_ready<T, F>(
    config: &PollConfig,
    callback: Option<&dyn PollCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_pollable() => return Err(e),
            Err(_) => {
                attempt += 1;
                let elapsed = start.elapsed();

                if elapsed >= config.timeout || attempt >= config.max_polls {
                    return Err(Error::ReportTimeout {
                        waited_secs: elapsed.as_secs(),
                        attempts: attempt,
                    });
                }

                let delay = config
                    .delay_for_attempt(attempt - 1)
                    .min(config.timeout - elapsed);

                if let Some(cb) = callback {
                    cb.on_wait(attempt, elapsed, delay);
                }

                thread::sleep(delay);
            }
        }
    }
}
