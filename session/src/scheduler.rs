//! Session scheduler: validation, the capture-pacing worker loop, and
//! stop/status handling.
//!
//! The scheduler owns at most one background worker at a time; starting a
//! session waits out any predecessor still draining its cleanup, and a
//! session generation counter keeps an abandoned worker from touching a
//! successor's state. Cancellation is cooperative: the worker polls an
//! atomic flag between captures and inside its pacing sleep, and stop
//! joins it with a bound.
//! Session state lives behind a single mutex held only for field access,
//! never across a capture or a sleep.

use crate::config::{SessionConfig, SessionRequest, SessionStatus};
use crate::error::SessionError;
use crate::metadata;
use crate::status::{format_remaining, SessionStatusSnapshot};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use shared::sync::join_with_timeout;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Minimum pacing delay between captures, in seconds.
pub const MIN_CAPTURE_DELAY_SECS: f64 = 0.5;

/// Bound on joining the worker when stopping a session.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Slice size for the worker's cooperative pacing sleep.
const PACING_SLICE: Duration = Duration::from_millis(100);

/// Capture capability the scheduler needs from the camera.
pub trait SessionCamera: Send + Sync {
    /// Capture one still directly to the given path.
    fn capture_to(&self, path: &Path) -> Result<()>;

    /// Capture one still to a device-chosen filename inside `dir`.
    fn capture_untargeted(&self, dir: &Path) -> Result<()>;

    /// Whether `capture_to` is backed by a real capture-to-path call.
    /// Checked once at scheduler construction, not per capture.
    fn supports_targeted_capture(&self) -> bool;
}

/// Tracking capability the scheduler needs from the mount.
pub trait SessionMount: Send + Sync {
    fn start_tracking(&self) -> bool;
    fn stop_tracking(&self) -> Result<()>;
    fn is_tracking(&self) -> bool;
}

/// How session images get onto disk, decided at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBinding {
    /// Camera writes directly to the caller-supplied path.
    Direct,
    /// Camera only captures untargeted; the worker renames the newest
    /// file in the session directory afterward. Racy if other writers
    /// touch the directory; kept as the observed device behavior.
    RenameNewest,
}

struct SchedulerShared {
    session: Mutex<SessionConfig>,
    running: AtomicBool,
    /// Bumped each time a new session config is installed. A worker (and
    /// the stop path) only touches session state while the generation it
    /// was started for is still current, so a finishing worker cannot
    /// reach into a successor session.
    generation: AtomicU64,
}

/// Coordinates the camera and mount through one capture session at a time.
pub struct SessionScheduler {
    camera: Arc<dyn SessionCamera>,
    mount: Arc<dyn SessionMount>,
    binding: CaptureBinding,
    base_dir: PathBuf,
    shared: Arc<SchedulerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionScheduler {
    /// Bind to a camera and mount. The capture variant is selected here
    /// from the camera's capability, not probed per capture.
    pub fn new(
        camera: Arc<dyn SessionCamera>,
        mount: Arc<dyn SessionMount>,
        base_dir: PathBuf,
    ) -> Self {
        let binding = if camera.supports_targeted_capture() {
            CaptureBinding::Direct
        } else {
            CaptureBinding::RenameNewest
        };
        debug!("session capture binding: {binding:?}");
        Self {
            camera,
            mount,
            binding,
            base_dir,
            shared: Arc::new(SchedulerShared {
                session: Mutex::new(SessionConfig::idle()),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn capture_binding(&self) -> CaptureBinding {
        self.binding
    }

    /// Validate and start a session, returning as soon as the worker is
    /// spawned. Only one session may be running at a time.
    pub fn start_session(&self, request: SessionRequest) -> Result<(), SessionError> {
        if request.name.trim().is_empty() {
            return Err(SessionError::EmptyName);
        }
        if request.total_images == 0 {
            return Err(SessionError::NoImages);
        }
        if matches!(request.total_time_hours, Some(h) if h <= 0.0) {
            return Err(SessionError::InvalidDuration);
        }

        // A worker that has finished its capture loop may still be
        // draining cleanup (the mount stop can block for its join bound);
        // wait for it here so the new session never overlaps a
        // predecessor's cleanup.
        {
            let mut worker = self.worker.lock().unwrap();
            if let Some(handle) = worker.take() {
                if self.shared.running.load(Ordering::SeqCst) {
                    *worker = Some(handle);
                    return Err(SessionError::AlreadyRunning);
                }
                join_with_timeout(handle, WORKER_JOIN_TIMEOUT, "previous session worker");
            }
        }

        let session_dir = self.base_dir.join(sanitize_name(&request.name));
        let generation = {
            let mut session = self.shared.session.lock().unwrap();
            if session.status == SessionStatus::Running {
                return Err(SessionError::AlreadyRunning);
            }
            std::fs::create_dir_all(&session_dir).map_err(|source| SessionError::SessionDir {
                path: session_dir.clone(),
                source,
            })?;
            *session = SessionConfig::from_request(&request, session_dir.clone());
            metadata::persist(&session);
            self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        info!(
            "session '{}' started: {} images into {}",
            request.name,
            request.total_images,
            session_dir.display()
        );

        if request.tracking_enabled {
            if self.mount.is_tracking() {
                debug!("mount already tracking, session will reuse it");
            } else if !self.mount.start_tracking() {
                // The session still starts; only the tracking is degraded.
                warn!("failed to start mount tracking for session '{}'", request.name);
            }
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let camera = self.camera.clone();
        let mount = self.mount.clone();
        let binding = self.binding;
        let shared = self.shared.clone();
        let handle =
            std::thread::spawn(move || worker_loop(camera, mount, binding, shared, generation));
        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop a running session. No-op success when nothing is running;
    /// never flips a terminal `Error` status to `Completed`.
    pub fn stop_session(&self) -> Result<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            debug!("stop_session with no active worker");
            return Ok(());
        }
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            join_with_timeout(handle, WORKER_JOIN_TIMEOUT, "session worker");
        }
        {
            let mut session = self.shared.session.lock().unwrap();
            if self.shared.generation.load(Ordering::SeqCst) != generation {
                debug!("session replaced during stop, leaving successor alone");
                return Ok(());
            }
            if session.end_time.is_none() {
                session.end_time = Some(Utc::now());
            }
            if session.status == SessionStatus::Running {
                session.status = SessionStatus::Completed;
            }
            metadata::persist(&session);
        }
        stop_session_tracking(self.mount.as_ref(), &self.shared, generation);
        info!("session stopped");
        Ok(())
    }

    /// Lock-protected copied snapshot of session progress.
    pub fn get_session_status(&self) -> SessionStatusSnapshot {
        let session = self.shared.session.lock().unwrap();
        let progress = if session.total_images == 0 {
            0.0
        } else {
            session.images_captured as f64 / session.total_images as f64 * 100.0
        };
        let elapsed = elapsed_secs(session.start_time);
        let (remaining_time, estimated_completion) = match session.total_time_hours {
            Some(hours) => {
                let remaining = (hours * 3600.0 - elapsed).max(0.0);
                let completion = session
                    .start_time
                    .map(|t| t + chrono::Duration::milliseconds((hours * 3_600_000.0) as i64));
                (Some(format_remaining(remaining)), completion)
            }
            None => (None, None),
        };
        SessionStatusSnapshot {
            running: self.shared.running.load(Ordering::SeqCst),
            status: session.status,
            name: session.name.clone(),
            total_images: session.total_images,
            images_captured: session.images_captured,
            progress,
            elapsed_seconds: elapsed,
            session_dir: session.session_dir.clone(),
            remaining_time,
            estimated_completion,
        }
    }
}

/// Pacing delay before the next capture, in seconds.
///
/// Untimed sessions use the minimum delay. Timed sessions spread the
/// remaining images over the remaining wall-clock budget; the `- 1`
/// accounts for the image just captured. A session behind schedule
/// captures at the minimum delay until it catches up or finishes.
pub fn calculate_capture_delay(
    total_images: u32,
    images_captured: u32,
    total_time_hours: Option<f64>,
    elapsed_secs: f64,
) -> f64 {
    let Some(hours) = total_time_hours else {
        return MIN_CAPTURE_DELAY_SECS;
    };
    let remaining_images = total_images as i64 - images_captured as i64 - 1;
    if remaining_images <= 0 {
        return MIN_CAPTURE_DELAY_SECS;
    }
    let remaining_time = hours * 3600.0 - elapsed_secs;
    if remaining_time <= 0.0 {
        return MIN_CAPTURE_DELAY_SECS;
    }
    (remaining_time / remaining_images as f64).max(MIN_CAPTURE_DELAY_SECS)
}

/// Session worker: capture loop plus cleanup.
///
/// Every session-state touch after the capture loop rechecks the worker's
/// generation, so a worker still draining its cleanup (the mount stop can
/// block for the join bound) never finalizes, persists, or stops tracking
/// for a session started after it.
fn worker_loop(
    camera: Arc<dyn SessionCamera>,
    mount: Arc<dyn SessionMount>,
    binding: CaptureBinding,
    shared: Arc<SchedulerShared>,
    generation: u64,
) {
    let outcome = run_capture_loop(camera.as_ref(), binding, &shared, generation);
    {
        let mut session = shared.session.lock().unwrap();
        if shared.generation.load(Ordering::SeqCst) != generation {
            debug!("worker for a replaced session exiting without cleanup");
            return;
        }
        match outcome {
            Ok(()) => {
                if session.status == SessionStatus::Running {
                    session.status = SessionStatus::Completed;
                    info!(
                        "session '{}' completed: {}/{} images",
                        session.name, session.images_captured, session.total_images
                    );
                }
            }
            Err(e) => {
                error!("session '{}' failed: {e:#}", session.name);
                session.status = SessionStatus::Error;
            }
        }
        if session.end_time.is_none() {
            session.end_time = Some(Utc::now());
        }
        metadata::persist(&session);
        // Cleared under the lock: a start accepted after this point sees
        // the final status and a fully settled running flag together.
        shared.running.store(false, Ordering::SeqCst);
    }
    stop_session_tracking(mount.as_ref(), &shared, generation);
}

/// Capture images until the count is reached, the session is stopped, or
/// a capture fails. A capture error propagates out and becomes the
/// terminal `Error` status.
fn run_capture_loop(
    camera: &dyn SessionCamera,
    binding: CaptureBinding,
    shared: &SchedulerShared,
    generation: u64,
) -> Result<()> {
    loop {
        let (next_index, session_dir) = {
            let session = shared.session.lock().unwrap();
            if shared.generation.load(Ordering::SeqCst) != generation {
                return Ok(());
            }
            if !shared.running.load(Ordering::SeqCst) || session.status != SessionStatus::Running {
                return Ok(());
            }
            if session.images_captured >= session.total_images {
                return Ok(());
            }
            (session.images_captured + 1, session.session_dir.clone())
        };

        capture_session_image(camera, binding, &session_dir, next_index)?;

        let delay = {
            let mut session = shared.session.lock().unwrap();
            if shared.generation.load(Ordering::SeqCst) != generation {
                return Ok(());
            }
            session.images_captured += 1;
            metadata::persist(&session);
            info!(
                "session '{}': captured image {}/{}",
                session.name, session.images_captured, session.total_images
            );
            calculate_capture_delay(
                session.total_images,
                session.images_captured,
                session.total_time_hours,
                elapsed_secs(session.start_time),
            )
        };
        pace(shared, Duration::from_secs_f64(delay));
    }
}

/// Capture one session image as `image_%04d.jpg`.
fn capture_session_image(
    camera: &dyn SessionCamera,
    binding: CaptureBinding,
    session_dir: &Path,
    index: u32,
) -> Result<()> {
    let path = session_dir.join(format!("image_{index:04}.jpg"));
    match binding {
        CaptureBinding::Direct => camera
            .capture_to(&path)
            .with_context(|| format!("capturing {}", path.display()))?,
        CaptureBinding::RenameNewest => {
            camera
                .capture_untargeted(session_dir)
                .context("fallback capture")?;
            let newest = newest_capture_file(session_dir)?
                .ok_or_else(|| anyhow!("no file found in session directory after capture"))?;
            if newest != path {
                std::fs::rename(&newest, &path).with_context(|| {
                    format!("renaming {} to {}", newest.display(), path.display())
                })?;
            }
        }
    }
    Ok(())
}

/// Newest regular file in the session directory, ignoring the metadata
/// sidecar (which is rewritten after every capture and would otherwise
/// always win).
fn newest_capture_file(session_dir: &Path) -> Result<Option<PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(session_dir).context("reading session directory")? {
        let entry = entry.context("reading session directory entry")?;
        let path = entry.path();
        if !path.is_file() || entry.file_name() == metadata::METADATA_FILENAME {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .context("reading file mtime")?;
        if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// Sleep in short slices so a stop request interrupts long pacing delays.
fn pace(shared: &SchedulerShared, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() {
        if !shared.running.load(Ordering::SeqCst) {
            return;
        }
        let slice = remaining.min(PACING_SLICE);
        std::thread::sleep(slice);
        remaining -= slice;
    }
}

/// Stop mount tracking on behalf of the session, once.
///
/// The stopped-by-scheduler flag is set under the lock before the
/// blocking stop call so a concurrent stop path cannot double-stop, and
/// the generation is rechecked there so a stale caller never stops
/// tracking a later session started.
fn stop_session_tracking(mount: &dyn SessionMount, shared: &SchedulerShared, generation: u64) {
    let should_stop = {
        let mut session = shared.session.lock().unwrap();
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let stop = session.tracking_enabled
            && !session.mount_tracking_stopped_by_scheduler
            && mount.is_tracking();
        if stop {
            session.mount_tracking_stopped_by_scheduler = true;
        }
        stop
    };
    if !should_stop {
        return;
    }
    if let Err(e) = mount.stop_tracking() {
        warn!("failed to stop mount tracking after session: {e:#}");
    }
    let session = shared.session.lock().unwrap();
    if shared.generation.load(Ordering::SeqCst) == generation {
        metadata::persist(&session);
    }
}

fn elapsed_secs(start: Option<DateTime<Utc>>) -> f64 {
    start
        .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
        .unwrap_or(0.0)
        .max(0.0)
}

fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}
