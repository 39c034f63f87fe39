//! External status snapshot for a session.

use crate::config::SessionStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Copied snapshot of session progress, safe to hand to callers without
/// exposing internal state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusSnapshot {
    pub running: bool,
    pub status: SessionStatus,
    pub name: String,
    pub total_images: u32,
    pub images_captured: u32,
    /// Percentage in `[0, 100]`; 0 when no images are requested.
    pub progress: f64,
    pub elapsed_seconds: f64,
    pub session_dir: PathBuf,
    /// Present only for time-boxed sessions.
    pub remaining_time: Option<String>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Format remaining seconds as `"Xh Ym"`, omitting zero components, with
/// `"0m"` when less than a minute remains.
pub fn format_remaining(seconds: f64) -> String {
    let total_minutes = (seconds.max(0.0) / 60.0).floor() as u64;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    match (hours, minutes) {
        (0, 0) => "0m".to_string(),
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}
