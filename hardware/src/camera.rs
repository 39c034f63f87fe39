//! Camera device owner: mode state machine and live frame loop.
//!
//! `CameraDevice` wraps a [`CameraHandle`] and serializes all access to it
//! behind one mutex. The background frame loop locks the handle once per
//! frame, so a still or video mode switch pauses the live view simply by
//! holding the handle lock for the duration of the transition.
//!
//! Mode transitions always run stop -> configure -> start, and any failure
//! path ends with a best-effort return to preview: a broken capture leaves
//! the device degraded but streaming, never stuck in still or video mode.

use crate::error::HardwareError;
use crate::handle::{CameraControls, CameraHandle, CameraMode};
use anyhow::{Context, Result};
use image::RgbImage;
use shared::gain_lut::{apply_gain_lut, build_gain_lut, GAIN_FACTOR_RANGE};
use shared::sync::join_with_timeout;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Exposure clamp range in microseconds.
pub const EXPOSURE_MICROS_RANGE: (u64, u64) = (100, 300_000_000);

/// Analog gain clamp range in sensor units.
pub const ANALOG_GAIN_RANGE: (f64, f64) = (0.2, 16.0);

/// JPEG quality for encoded preview frames.
const PREVIEW_JPEG_QUALITY: u8 = 80;

/// Pause between successful frame loop iterations.
const FRAME_PAUSE: Duration = Duration::from_millis(30);

/// Backoff after a failed frame capture.
const FRAME_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Bound on joining the frame loop at shutdown.
const FRAME_LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Clamped camera settings. All numeric fields are kept in range by the
/// setters, so a stored snapshot is always legal to push to the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSettings {
    pub exposure_micros: u64,
    pub analog_gain: f64,
    pub digital_gain_enabled: bool,
    pub digital_gain_factor: f64,
    /// Gain decimation: the LUT is applied on every `frame_skip + 1`-th
    /// preview frame.
    pub frame_skip: u32,
    /// Write a raw companion file next to each captured still.
    pub save_raw: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            exposure_micros: 20_000,
            analog_gain: 1.0,
            digital_gain_enabled: false,
            digital_gain_factor: 1.0,
            frame_skip: 2,
            save_raw: false,
        }
    }
}

impl CameraSettings {
    fn controls(&self) -> CameraControls {
        CameraControls {
            exposure_micros: self.exposure_micros,
            analog_gain: self.analog_gain,
        }
    }
}

struct CameraState {
    mode: CameraMode,
    recording: bool,
    capture_status: String,
    settings: CameraSettings,
    lut: [u8; 256],
}

struct CameraShared {
    /// Serializes every driver call, including the frame loop's captures.
    handle: Mutex<Box<dyn CameraHandle>>,
    state: Mutex<CameraState>,
    /// Latest encoded preview frame. Written only by the frame loop.
    latest_frame: Mutex<Option<Vec<u8>>>,
    running: AtomicBool,
}

/// Owner of the camera handle and its background frame loop.
pub struct CameraDevice {
    shared: Arc<CameraShared>,
    frame_loop: Mutex<Option<JoinHandle<()>>>,
}

impl CameraDevice {
    /// Bring up the camera in preview mode and start the frame loop.
    ///
    /// Init failure is fatal; the caller must retry device creation.
    pub fn new(mut handle: Box<dyn CameraHandle>) -> Result<Self, HardwareError> {
        let settings = CameraSettings::default();
        handle.configure(CameraMode::Preview)?;
        handle.start()?;
        handle.set_controls(&settings.controls())?;

        let shared = Arc::new(CameraShared {
            handle: Mutex::new(handle),
            state: Mutex::new(CameraState {
                mode: CameraMode::Preview,
                recording: false,
                capture_status: "idle".to_string(),
                lut: build_gain_lut(settings.digital_gain_factor),
                settings,
            }),
            latest_frame: Mutex::new(None),
            running: AtomicBool::new(true),
        });

        let loop_shared = shared.clone();
        let handle = std::thread::spawn(move || frame_loop(loop_shared));
        info!("camera device started in preview mode");

        Ok(Self {
            shared,
            frame_loop: Mutex::new(Some(handle)),
        })
    }

    /// Latest encoded preview frame, if any frame has been captured yet.
    ///
    /// Pure read of the frame buffer; never waits on the acquisition loop.
    pub fn get_frame(&self) -> Option<Vec<u8>> {
        self.shared.latest_frame.lock().unwrap().clone()
    }

    /// Current capture mode.
    pub fn mode(&self) -> CameraMode {
        self.shared.state.lock().unwrap().mode
    }

    /// Whether a video recording is active.
    pub fn is_recording(&self) -> bool {
        self.shared.state.lock().unwrap().recording
    }

    /// Human-readable result of the last capture operation.
    pub fn capture_status(&self) -> String {
        self.shared.state.lock().unwrap().capture_status.clone()
    }

    /// Snapshot of the clamped settings.
    pub fn settings(&self) -> CameraSettings {
        self.shared.state.lock().unwrap().settings
    }

    /// Set exposure, clamped to [`EXPOSURE_MICROS_RANGE`].
    pub fn set_exposure_micros(&self, micros: u64) {
        let mut state = self.shared.state.lock().unwrap();
        state.settings.exposure_micros =
            micros.clamp(EXPOSURE_MICROS_RANGE.0, EXPOSURE_MICROS_RANGE.1);
    }

    /// Set analog gain, clamped to [`ANALOG_GAIN_RANGE`].
    pub fn set_analog_gain(&self, gain: f64) {
        let mut state = self.shared.state.lock().unwrap();
        state.settings.analog_gain = gain.clamp(ANALOG_GAIN_RANGE.0, ANALOG_GAIN_RANGE.1);
    }

    /// Enable or disable digital gain and set its factor (clamped). The
    /// LUT is rebuilt when the factor changes while enabled.
    pub fn set_digital_gain(&self, enabled: bool, factor: f64) {
        let factor = factor.clamp(GAIN_FACTOR_RANGE.0, GAIN_FACTOR_RANGE.1);
        let mut state = self.shared.state.lock().unwrap();
        let rebuild = enabled && factor != state.settings.digital_gain_factor;
        state.settings.digital_gain_enabled = enabled;
        state.settings.digital_gain_factor = factor;
        if rebuild {
            state.lut = build_gain_lut(factor);
            debug!("digital gain LUT rebuilt for factor {factor}");
        }
    }

    /// Set the gain decimation factor for the frame loop.
    pub fn set_frame_skip(&self, frame_skip: u32) {
        self.shared.state.lock().unwrap().settings.frame_skip = frame_skip;
    }

    /// Toggle raw companion capture for stills.
    pub fn set_save_raw(&self, save_raw: bool) {
        self.shared.state.lock().unwrap().settings.save_raw = save_raw;
    }

    /// Push exposure and analog gain to the driver unconditionally, and
    /// rebuild the LUT if digital gain is active above unity.
    pub fn update_settings(&self) -> Result<()> {
        let settings = self.settings();
        {
            let mut handle = self.shared.handle.lock().unwrap();
            handle
                .set_controls(&settings.controls())
                .context("pushing camera controls")?;
        }
        if settings.digital_gain_enabled && settings.digital_gain_factor > 1.0 {
            let mut state = self.shared.state.lock().unwrap();
            state.lut = build_gain_lut(settings.digital_gain_factor);
        }
        info!(
            "camera controls applied: exposure={}us gain={:.2}",
            settings.exposure_micros, settings.analog_gain
        );
        Ok(())
    }

    /// Capture exactly one still frame to `path`.
    ///
    /// Transitions preview -> still -> preview; the device is back in
    /// preview on return whether or not the capture succeeded. With
    /// `save_raw` set, a `.dng` companion is attempted next to the JPEG
    /// (its failure is a warning, not a capture failure).
    pub fn capture_still(&self, path: &Path) -> Result<()> {
        let settings = self.settings();
        let mut handle = self.shared.handle.lock().unwrap();
        self.set_mode(CameraMode::Still);

        let capture = run_still_capture(handle.as_mut(), path, &settings);
        let recovery = return_to_preview(handle.as_mut(), &settings.controls());
        drop(handle);

        self.set_mode(CameraMode::Preview);
        match &capture {
            Ok(()) => self.set_capture_status(format!("captured {}", path.display())),
            Err(e) => self.set_capture_status(format!("still capture failed: {e:#}")),
        }
        if let Err(e) = recovery {
            // Degraded but alive: surfaced through capture_status and logs.
            error!("failed to return camera to preview after still capture: {e:#}");
            self.set_capture_status(format!("preview recovery failed: {e:#}"));
        }
        capture
    }

    /// Switch to video mode and start recording to `path`.
    pub fn start_recording(&self, path: &Path) -> Result<()> {
        let settings = self.settings();
        let mut handle = self.shared.handle.lock().unwrap();
        if self.shared.state.lock().unwrap().recording {
            anyhow::bail!("recording already in progress");
        }
        self.set_mode(CameraMode::Video);

        let result = (|| -> Result<()> {
            switch_mode(handle.as_mut(), CameraMode::Video).context("switching to video mode")?;
            handle
                .start_recording(path)
                .context("starting video encode")?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                let mut state = self.shared.state.lock().unwrap();
                state.recording = true;
                state.capture_status = format!("recording to {}", path.display());
                info!("video recording started: {}", path.display());
                Ok(())
            }
            Err(e) => {
                let recovery = return_to_preview(handle.as_mut(), &settings.controls());
                drop(handle);
                self.set_mode(CameraMode::Preview);
                self.set_capture_status(format!("recording start failed: {e:#}"));
                if let Err(r) = recovery {
                    error!("failed to return camera to preview after recording failure: {r:#}");
                }
                Err(e)
            }
        }
    }

    /// Stop an active recording and return to preview.
    ///
    /// Returns `Ok(false)` without touching the device when no recording
    /// is active.
    pub fn stop_recording(&self) -> Result<bool> {
        if !self.shared.state.lock().unwrap().recording {
            debug!("stop_recording called with no active recording");
            return Ok(false);
        }
        let settings = self.settings();
        let mut handle = self.shared.handle.lock().unwrap();

        let stop = handle.stop_recording().context("stopping video encode");
        let recovery = return_to_preview(handle.as_mut(), &settings.controls());
        drop(handle);

        {
            let mut state = self.shared.state.lock().unwrap();
            state.recording = false;
            state.mode = CameraMode::Preview;
        }
        match &stop {
            Ok(()) => self.set_capture_status("recording stopped".to_string()),
            Err(e) => self.set_capture_status(format!("recording stop failed: {e:#}")),
        }
        if let Err(e) = recovery {
            error!("failed to return camera to preview after recording: {e:#}");
        }
        stop.map(|()| true)
    }

    /// Stop the frame loop and the underlying pipeline.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.frame_loop.lock().unwrap().take() {
            join_with_timeout(handle, FRAME_LOOP_JOIN_TIMEOUT, "camera frame loop");
        }
        let mut handle = self.shared.handle.lock().unwrap();
        if let Err(e) = handle.stop() {
            warn!("failed to stop camera pipeline at shutdown: {e}");
        }
        info!("camera device shut down");
    }

    fn set_mode(&self, mode: CameraMode) {
        self.shared.state.lock().unwrap().mode = mode;
    }

    fn set_capture_status(&self, status: String) {
        self.shared.state.lock().unwrap().capture_status = status;
    }
}

impl Drop for CameraDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Stop/configure/start the pipeline for a new mode.
fn switch_mode(handle: &mut dyn CameraHandle, mode: CameraMode) -> Result<(), HardwareError> {
    handle.stop()?;
    handle.configure(mode)?;
    handle.start()?;
    Ok(())
}

fn run_still_capture(
    handle: &mut dyn CameraHandle,
    path: &Path,
    settings: &CameraSettings,
) -> Result<()> {
    switch_mode(handle, CameraMode::Still).context("switching to still mode")?;
    handle.capture_to_file(path).context("capturing still")?;
    if settings.save_raw {
        let raw_path = path.with_extension("dng");
        if let Err(e) = handle.capture_to_file(&raw_path) {
            warn!("raw companion capture failed for {}: {e}", raw_path.display());
        }
    }
    Ok(())
}

/// Return the pipeline to preview and reapply the sensor controls.
fn return_to_preview(handle: &mut dyn CameraHandle, controls: &CameraControls) -> Result<()> {
    switch_mode(handle, CameraMode::Preview).context("switching back to preview")?;
    handle
        .set_controls(controls)
        .context("reapplying controls after preview switch")?;
    Ok(())
}

/// Background frame-acquisition loop.
///
/// Runs for the lifetime of the device: capture one frame, apply the gain
/// LUT on every `(frame_skip + 1)`-th frame, encode to JPEG, swap the
/// latest-frame buffer. Capture errors log and back off; only the running
/// flag stops the loop.
fn frame_loop(shared: Arc<CameraShared>) {
    info!("camera frame loop started");
    let mut frame_count: u64 = 0;
    let mut consecutive_errors: u32 = 0;

    while shared.running.load(Ordering::SeqCst) {
        let captured = shared.handle.lock().unwrap().capture_frame();
        match captured {
            Ok(mut frame) => {
                consecutive_errors = 0;
                frame_count += 1;

                let lut = {
                    let state = shared.state.lock().unwrap();
                    let interval = state.settings.frame_skip as u64 + 1;
                    let boost = state.settings.digital_gain_enabled
                        && state.settings.digital_gain_factor > 1.0
                        && frame_count % interval == 0;
                    boost.then_some(state.lut)
                };
                if let Some(lut) = lut {
                    apply_gain_lut(&mut frame, &lut);
                }

                match encode_preview_jpeg(&frame) {
                    Some(jpeg) => {
                        *shared.latest_frame.lock().unwrap() = Some(jpeg);
                    }
                    None => warn!("preview JPEG encode failed for frame {frame_count}"),
                }
                std::thread::sleep(FRAME_PAUSE);
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!("frame capture failed ({consecutive_errors} consecutive): {e}");
                std::thread::sleep(FRAME_ERROR_BACKOFF);
            }
        }
    }
    info!("camera frame loop stopped after {frame_count} frames");
}

/// Encode an RGB frame as JPEG at the fixed preview quality.
fn encode_preview_jpeg(frame: &RgbImage) -> Option<Vec<u8>> {
    let mut jpeg_bytes = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_bytes, PREVIEW_JPEG_QUALITY);
    encoder.encode_image(frame).ok()?;
    Some(jpeg_bytes)
}
