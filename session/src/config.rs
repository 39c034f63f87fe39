//! Session state and start-request types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle of a capture session. `Completed` and `Error` are terminal
/// until a new session replaces the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Completed,
    Error,
}

/// Parameters for starting a session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub name: String,
    pub total_images: u32,
    /// Capture with the camera's current settings instead of session
    /// defaults.
    pub use_current_settings: bool,
    /// Start mount tracking along with the session.
    pub tracking_enabled: bool,
    /// Target duration to spread the captures over. `None` means capture
    /// as fast as the minimum pacing delay allows.
    pub total_time_hours: Option<f64>,
}

impl SessionRequest {
    pub fn new(name: impl Into<String>, total_images: u32) -> Self {
        Self {
            name: name.into(),
            total_images,
            use_current_settings: true,
            tracking_enabled: false,
            total_time_hours: None,
        }
    }
}

/// Live session state, one instance replaced per session.
///
/// Serialized verbatim as the `session_metadata.json` sidecar, so field
/// names here are the on-disk schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub name: String,
    pub total_images: u32,
    pub use_current_settings: bool,
    #[serde(rename = "enable_tracking")]
    pub tracking_enabled: bool,
    pub total_time_hours: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Monotonically non-decreasing while the session is running.
    pub images_captured: u32,
    pub session_dir: PathBuf,
    pub status: SessionStatus,
    /// Set once the scheduler has stopped mount tracking on behalf of
    /// this session; prevents a double stop between the worker's cleanup
    /// and an explicit stop call.
    #[serde(rename = "mount_tracking_stopped")]
    pub mount_tracking_stopped_by_scheduler: bool,
}

impl SessionConfig {
    /// Placeholder config before any session has started.
    pub fn idle() -> Self {
        Self {
            name: String::new(),
            total_images: 0,
            use_current_settings: true,
            tracking_enabled: false,
            total_time_hours: None,
            start_time: None,
            end_time: None,
            images_captured: 0,
            session_dir: PathBuf::new(),
            status: SessionStatus::Idle,
            mount_tracking_stopped_by_scheduler: false,
        }
    }

    pub fn from_request(request: &SessionRequest, session_dir: PathBuf) -> Self {
        Self {
            name: request.name.clone(),
            total_images: request.total_images,
            use_current_settings: request.use_current_settings,
            tracking_enabled: request.tracking_enabled,
            total_time_hours: request.total_time_hours,
            start_time: Some(Utc::now()),
            end_time: None,
            images_captured: 0,
            session_dir,
            status: SessionStatus::Running,
            mount_tracking_stopped_by_scheduler: false,
        }
    }
}
