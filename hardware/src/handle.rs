//! Device-handle contract for camera and mount hardware bindings.
//!
//! Drivers are external to this workspace; these traits are the boundary
//! the device owners program against. A handle is a dumb capability: it
//! holds no mode or session state of its own and every call maps to one
//! driver operation.

use crate::error::HardwareError;
use image::RgbImage;
use std::path::Path;

/// Capture modes the camera pipeline can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    /// Continuous low-resolution streaming for the live view.
    Preview,
    /// Full-resolution single-frame capture.
    Still,
    /// Video recording.
    Video,
}

/// Sensor controls pushed to the driver as one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraControls {
    /// Exposure time in microseconds.
    pub exposure_micros: u64,
    /// Analog gain in sensor units.
    pub analog_gain: f64,
}

/// Low-level camera driver capability.
///
/// Reconfiguration follows the driver's stop/configure/start discipline;
/// callers (not handles) own that sequencing.
pub trait CameraHandle: Send {
    /// Configure the pipeline for a capture mode. Only valid while stopped.
    fn configure(&mut self, mode: CameraMode) -> Result<(), HardwareError>;

    /// Start the configured pipeline.
    fn start(&mut self) -> Result<(), HardwareError>;

    /// Stop the pipeline.
    fn stop(&mut self) -> Result<(), HardwareError>;

    /// Capture one frame from the running pipeline.
    fn capture_frame(&mut self) -> Result<RgbImage, HardwareError>;

    /// Capture one frame and write it to `path` in the driver's native
    /// encoded format.
    fn capture_to_file(&mut self, path: &Path) -> Result<(), HardwareError>;

    /// Push sensor controls to the driver.
    fn set_controls(&mut self, controls: &CameraControls) -> Result<(), HardwareError>;

    /// Begin encoding video to `path`. Only valid in video mode.
    fn start_recording(&mut self, path: &Path) -> Result<(), HardwareError>;

    /// Stop an active video encode.
    fn stop_recording(&mut self) -> Result<(), HardwareError>;
}

/// GPIO capability driving the mount's stepper coils.
pub trait MotorInterface: Send {
    /// Claim a pin as an output.
    fn setup(&mut self, pin: u8) -> Result<(), HardwareError>;

    /// Drive a pin high or low.
    fn write(&mut self, pin: u8, high: bool) -> Result<(), HardwareError>;
}
