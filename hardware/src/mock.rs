//! In-memory handle implementations for testing.
//!
//! Both mocks are `Clone`: clones share the same instrumentation, so a
//! test can keep a clone to flip failure switches and inspect recorded
//! calls after the original has been boxed into a device.

use crate::error::HardwareError;
use crate::handle::{CameraControls, CameraHandle, CameraMode, MotorInterface};
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Mock camera handle producing synthetic gradient frames.
#[derive(Clone)]
pub struct MockCameraHandle {
    width: u32,
    height: u32,
    started: Arc<AtomicBool>,
    mode: Arc<Mutex<CameraMode>>,
    controls: Arc<Mutex<Option<CameraControls>>>,
    fail_frames: Arc<AtomicBool>,
    fail_still: Arc<AtomicBool>,
    fail_configure: Arc<AtomicBool>,
    recording: Arc<AtomicBool>,
    captured_files: Arc<Mutex<Vec<PathBuf>>>,
    frames_served: Arc<AtomicU64>,
}

impl MockCameraHandle {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            started: Arc::new(AtomicBool::new(false)),
            mode: Arc::new(Mutex::new(CameraMode::Preview)),
            controls: Arc::new(Mutex::new(None)),
            fail_frames: Arc::new(AtomicBool::new(false)),
            fail_still: Arc::new(AtomicBool::new(false)),
            fail_configure: Arc::new(AtomicBool::new(false)),
            recording: Arc::new(AtomicBool::new(false)),
            captured_files: Arc::new(Mutex::new(Vec::new())),
            frames_served: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make `capture_frame` fail until cleared.
    pub fn set_fail_frames(&self, fail: bool) {
        self.fail_frames.store(fail, Ordering::SeqCst);
    }

    /// Make `capture_to_file` fail until cleared.
    pub fn set_fail_still(&self, fail: bool) {
        self.fail_still.store(fail, Ordering::SeqCst);
    }

    /// Make `configure` fail until cleared.
    pub fn set_fail_configure(&self, fail: bool) {
        self.fail_configure.store(fail, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn current_mode(&self) -> CameraMode {
        *self.mode.lock().unwrap()
    }

    pub fn last_controls(&self) -> Option<CameraControls> {
        *self.controls.lock().unwrap()
    }

    pub fn captured_files(&self) -> Vec<PathBuf> {
        self.captured_files.lock().unwrap().clone()
    }

    pub fn frames_served(&self) -> u64 {
        self.frames_served.load(Ordering::SeqCst)
    }
}

impl CameraHandle for MockCameraHandle {
    fn configure(&mut self, mode: CameraMode) -> Result<(), HardwareError> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(HardwareError::Operation("mock configure failure".into()));
        }
        if self.started.load(Ordering::SeqCst) {
            return Err(HardwareError::Operation(
                "configure called while pipeline running".into(),
            ));
        }
        *self.mode.lock().unwrap() = mode;
        Ok(())
    }

    fn start(&mut self) -> Result<(), HardwareError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RgbImage, HardwareError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(HardwareError::Operation("pipeline not started".into()));
        }
        if self.fail_frames.load(Ordering::SeqCst) {
            return Err(HardwareError::Operation("mock frame failure".into()));
        }
        self.frames_served.fetch_add(1, Ordering::SeqCst);
        let frame = RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        Ok(frame)
    }

    fn capture_to_file(&mut self, path: &Path) -> Result<(), HardwareError> {
        if self.fail_still.load(Ordering::SeqCst) {
            return Err(HardwareError::Operation("mock still failure".into()));
        }
        std::fs::write(path, b"mock-encoded-frame")
            .map_err(|e| HardwareError::Operation(format!("write {}: {e}", path.display())))?;
        self.captured_files.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn set_controls(&mut self, controls: &CameraControls) -> Result<(), HardwareError> {
        *self.controls.lock().unwrap() = Some(*controls);
        Ok(())
    }

    fn start_recording(&mut self, path: &Path) -> Result<(), HardwareError> {
        std::fs::write(path, b"mock-video-header")
            .map_err(|e| HardwareError::Operation(format!("write {}: {e}", path.display())))?;
        self.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), HardwareError> {
        self.recording.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock GPIO recording every pin write.
#[derive(Clone, Default)]
pub struct MockMotorPins {
    setup_pins: Arc<Mutex<Vec<u8>>>,
    writes: Arc<Mutex<Vec<(u8, bool)>>>,
    fail_writes: Arc<AtomicBool>,
    fail_setup: Arc<AtomicBool>,
}

impl MockMotorPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_setup(&self, fail: bool) {
        self.fail_setup.store(fail, Ordering::SeqCst);
    }

    pub fn setup_pins(&self) -> Vec<u8> {
        self.setup_pins.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<(u8, bool)> {
        self.writes.lock().unwrap().clone()
    }

    /// Final level of each pin after all recorded writes.
    pub fn last_levels(&self) -> HashMap<u8, bool> {
        let mut levels = HashMap::new();
        for (pin, high) in self.writes.lock().unwrap().iter() {
            levels.insert(*pin, *high);
        }
        levels
    }
}

impl MotorInterface for MockMotorPins {
    fn setup(&mut self, pin: u8) -> Result<(), HardwareError> {
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err(HardwareError::Init(format!("mock setup failure on pin {pin}")));
        }
        self.setup_pins.lock().unwrap().push(pin);
        Ok(())
    }

    fn write(&mut self, pin: u8, high: bool) -> Result<(), HardwareError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HardwareError::Operation(format!(
                "mock write failure on pin {pin}"
            )));
        }
        self.writes.lock().unwrap().push((pin, high));
        Ok(())
    }
}
