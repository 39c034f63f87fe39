//! Session orchestration for unattended multi-image capture.
//!
//! The [`scheduler::SessionScheduler`] validates start requests, paces
//! captures across a target duration, coordinates mount tracking, and
//! persists every state change to a JSON sidecar in the session
//! directory. It drives the camera and mount through the narrow
//! [`scheduler::SessionCamera`] / [`scheduler::SessionMount`] traits so
//! tests can substitute doubles.

pub mod bind;
pub mod config;
pub mod error;
pub mod metadata;
pub mod scheduler;
pub mod status;

pub use config::{SessionConfig, SessionRequest, SessionStatus};
pub use error::SessionError;
pub use scheduler::{
    calculate_capture_delay, CaptureBinding, SessionCamera, SessionMount, SessionScheduler,
};
pub use status::SessionStatusSnapshot;
