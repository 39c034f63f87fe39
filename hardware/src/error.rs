use thiserror::Error;

/// Errors produced by hardware handles and device owners.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// Device could not be brought up. Fatal at construction; the caller
    /// must retry device creation.
    #[error("hardware init failed: {0}")]
    Init(String),

    /// A capture, configure or pin-write call failed mid-operation. The
    /// device attempts recovery to a safe mode and keeps running.
    #[error("hardware operation failed: {0}")]
    Operation(String),
}
