//! Device orchestration for the capture rig.
//!
//! The two device owners here each run one background loop:
//!
//! - [`camera::CameraDevice`] owns the capture-mode state machine and a
//!   continuous frame-acquisition loop feeding the live preview buffer.
//! - [`mount::MountDevice`] owns the stepper phase state and the sidereal
//!   tracking loop.
//!
//! Real hardware bindings stay behind the [`handle`] traits; the [`mock`]
//! module provides in-memory implementations for tests and bench work.

pub mod camera;
pub mod error;
pub mod handle;
pub mod mock;
pub mod mount;

pub use camera::{CameraDevice, CameraSettings};
pub use error::HardwareError;
pub use handle::{CameraControls, CameraHandle, CameraMode, MotorInterface};
pub use mount::{MountDevice, MountStatus};
