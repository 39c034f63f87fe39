//! Scheduler trait implementations for the hardware devices.
//!
//! Kept separate so the scheduler itself never names a concrete device
//! type; tests bind their own doubles to the same traits.

use crate::scheduler::{SessionCamera, SessionMount};
use anyhow::Result;
use chrono::Utc;
use hardware::{CameraDevice, MountDevice};
use std::path::Path;

impl SessionCamera for CameraDevice {
    fn capture_to(&self, path: &Path) -> Result<()> {
        self.capture_still(path)
    }

    fn capture_untargeted(&self, dir: &Path) -> Result<()> {
        let name = format!("still_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S%3f"));
        self.capture_still(&dir.join(name))
    }

    fn supports_targeted_capture(&self) -> bool {
        true
    }
}

impl SessionMount for MountDevice {
    fn start_tracking(&self) -> bool {
        MountDevice::start_tracking(self)
    }

    fn stop_tracking(&self) -> Result<()> {
        MountDevice::stop_tracking(self)
    }

    fn is_tracking(&self) -> bool {
        MountDevice::is_tracking(self)
    }
}
