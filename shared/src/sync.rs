//! Helpers for joining cooperative background loops with a bound.
//!
//! All long-lived loops in this workspace stop via a polled flag, so a
//! join can block for at most one loop iteration. The bound exists for the
//! cases where an iteration is stuck in a slow hardware call: the caller
//! logs and moves on rather than hanging shutdown.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::warn;

/// Poll interval while waiting for a thread to finish.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Join `handle` if it finishes within `timeout`.
///
/// Returns the thread's result on a successful join. On timeout the
/// handle is abandoned with a warning; the thread is expected to exit on
/// its own once its current iteration completes, since its stop flag has
/// already been cleared by the caller.
pub fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration, name: &str) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{name} did not finish within {timeout:?}, abandoning join");
            return None;
        }
        std::thread::sleep(JOIN_POLL_INTERVAL);
    }
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{name} panicked before join");
            None
        }
    }
}
