use std::path::PathBuf;
use thiserror::Error;

/// Validation and precondition failures surfaced synchronously from
/// `start_session`. Worker-loop failures never appear here; they are
/// reflected through the session status instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already running")]
    AlreadyRunning,

    #[error("session name must not be empty")]
    EmptyName,

    #[error("total_images must be greater than zero")]
    NoImages,

    #[error("total_time_hours must be positive when set")]
    InvalidDuration,

    #[error("failed to create session directory {path}: {source}")]
    SessionDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
