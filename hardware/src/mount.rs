//! Mount device owner: stepper phase state and the tracking loop.
//!
//! The tracking loop advances one half-step per iteration and sleeps the
//! configured step delay, slow enough that cooperative cancellation via an
//! atomic flag is plenty. Pin-write failures during stepping are logged
//! and stepping continues; stopping always finishes by de-energizing every
//! coil, even when the hardware layer is already failing.

use crate::error::HardwareError;
use crate::handle::MotorInterface;
use anyhow::Result;
use shared::sync::join_with_timeout;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Step delay clamp range in seconds.
pub const STEP_DELAY_RANGE: (f64, f64) = (0.1, 10.0);

/// Default delay between steps, in seconds.
pub const DEFAULT_STEP_DELAY_SECS: f64 = 1.0;

/// Bound on joining the tracking loop when stopping.
const TRACKING_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Half-step commutation sequence for a 4-coil stepper.
pub const HALF_STEP_SEQUENCE: [[bool; 4]; 8] = [
    [true, false, false, false],
    [true, true, false, false],
    [false, true, false, false],
    [false, true, true, false],
    [false, false, true, false],
    [false, false, true, true],
    [false, false, false, true],
    [true, false, false, true],
];

/// Snapshot of the mount's tracking state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MountStatus {
    pub tracking: bool,
    pub direction: bool,
    pub step_delay_secs: f64,
    pub step_index: usize,
}

struct MountShared {
    motor: Mutex<Box<dyn MotorInterface>>,
    pins: Vec<u8>,
    phase_sequence: Vec<Vec<bool>>,
    tracking: AtomicBool,
    /// true = forward rotational sense.
    direction: AtomicBool,
    step_delay: Mutex<f64>,
    step_index: AtomicUsize,
}

/// Owner of the stepper motor interface and its tracking loop.
pub struct MountDevice {
    shared: Arc<MountShared>,
    tracking_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MountDevice {
    /// Claim the stepper pins and leave all coils de-energized.
    ///
    /// Pin setup failure is fatal at construction.
    pub fn new(motor: Box<dyn MotorInterface>, pins: Vec<u8>) -> Result<Self, HardwareError> {
        let sequence = HALF_STEP_SEQUENCE.iter().map(|p| p.to_vec()).collect();
        Self::with_phase_sequence(motor, pins, sequence)
    }

    /// As [`MountDevice::new`], with a caller-supplied phase sequence.
    pub fn with_phase_sequence(
        mut motor: Box<dyn MotorInterface>,
        pins: Vec<u8>,
        phase_sequence: Vec<Vec<bool>>,
    ) -> Result<Self, HardwareError> {
        if phase_sequence.is_empty() {
            return Err(HardwareError::Init("empty phase sequence".into()));
        }
        for pin in &pins {
            motor.setup(*pin)?;
            motor.write(*pin, false)?;
        }
        Ok(Self {
            shared: Arc::new(MountShared {
                motor: Mutex::new(motor),
                pins,
                phase_sequence,
                tracking: AtomicBool::new(false),
                direction: AtomicBool::new(true),
                step_delay: Mutex::new(DEFAULT_STEP_DELAY_SECS),
                step_index: AtomicUsize::new(0),
            }),
            tracking_loop: Mutex::new(None),
        })
    }

    /// Spawn the tracking loop. Returns `false` without side effects when
    /// tracking is already active.
    pub fn start_tracking(&self) -> bool {
        if self.shared.tracking.swap(true, Ordering::SeqCst) {
            return false;
        }
        let shared = self.shared.clone();
        let handle = std::thread::spawn(move || tracking_loop(shared));
        *self.tracking_loop.lock().unwrap() = Some(handle);
        info!("mount tracking started");
        true
    }

    /// Stop tracking: clear the flag, join the loop with a bound, then
    /// de-energize every coil regardless of the join outcome.
    pub fn stop_tracking(&self) -> Result<()> {
        self.shared.tracking.store(false, Ordering::SeqCst);
        if let Some(handle) = self.tracking_loop.lock().unwrap().take() {
            join_with_timeout(handle, TRACKING_JOIN_TIMEOUT, "mount tracking loop");
        }
        self.de_energize()?;
        info!("mount tracking stopped");
        Ok(())
    }

    pub fn is_tracking(&self) -> bool {
        self.shared.tracking.load(Ordering::SeqCst)
    }

    /// Update step delay and/or direction in place; the running loop picks
    /// the new values up on its next iteration.
    pub fn update_settings(&self, step_delay_secs: Option<f64>, direction: Option<bool>) {
        if let Some(delay) = step_delay_secs {
            let clamped = delay.clamp(STEP_DELAY_RANGE.0, STEP_DELAY_RANGE.1);
            *self.shared.step_delay.lock().unwrap() = clamped;
        }
        if let Some(direction) = direction {
            self.shared.direction.store(direction, Ordering::SeqCst);
        }
    }

    pub fn status(&self) -> MountStatus {
        MountStatus {
            tracking: self.is_tracking(),
            direction: self.shared.direction.load(Ordering::SeqCst),
            step_delay_secs: *self.shared.step_delay.lock().unwrap(),
            step_index: self.shared.step_index.load(Ordering::SeqCst),
        }
    }

    /// Drive every coil low. Attempted per pin even when earlier pins
    /// fail; the first error is returned after all pins were tried.
    fn de_energize(&self) -> Result<()> {
        let mut motor = self.shared.motor.lock().unwrap();
        let mut first_error = None;
        for pin in &self.shared.pins {
            if let Err(e) = motor.write(*pin, false) {
                warn!("failed to de-energize pin {pin}: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for MountDevice {
    fn drop(&mut self) {
        if self.is_tracking() {
            if let Err(e) = self.stop_tracking() {
                warn!("mount cleanup failed at drop: {e:#}");
            }
        }
    }
}

/// Next phase index, wrapping in either direction.
fn next_step_index(current: usize, sequence_len: usize, forward: bool) -> usize {
    if forward {
        (current + 1) % sequence_len
    } else {
        (current + sequence_len - 1) % sequence_len
    }
}

/// Background tracking loop: advance a step, write the phase vector,
/// sleep. Write failures are per-step warnings and never stop the loop.
fn tracking_loop(shared: Arc<MountShared>) {
    info!("mount tracking loop started");
    while shared.tracking.load(Ordering::SeqCst) {
        let forward = shared.direction.load(Ordering::SeqCst);
        let current = shared.step_index.load(Ordering::SeqCst);
        let next = next_step_index(current, shared.phase_sequence.len(), forward);
        shared.step_index.store(next, Ordering::SeqCst);

        {
            let mut motor = shared.motor.lock().unwrap();
            let phase = &shared.phase_sequence[next];
            for (pin, level) in shared.pins.iter().zip(phase.iter()) {
                if let Err(e) = motor.write(*pin, *level) {
                    warn!("step write failed on pin {pin}: {e}");
                }
            }
        }

        let delay = *shared.step_delay.lock().unwrap();
        std::thread::sleep(Duration::from_secs_f64(delay));
    }
    info!("mount tracking loop stopped");
}
