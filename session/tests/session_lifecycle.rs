//! End-to-end session lifecycle tests driving the scheduler against the
//! real device owners with mock hardware handles.

use hardware::mock::{MockCameraHandle, MockMotorPins};
use hardware::{CameraDevice, MountDevice};
use session::{
    CaptureBinding, SessionCamera, SessionError, SessionMount, SessionRequest, SessionScheduler,
    SessionStatus, SessionStatusSnapshot,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Rig {
    scheduler: SessionScheduler,
    camera_probe: MockCameraHandle,
    mount: Arc<MountDevice>,
    base_dir: TempDir,
}

fn make_rig() -> Rig {
    init_tracing();
    let camera_mock = MockCameraHandle::new(32, 24);
    let camera_probe = camera_mock.clone();
    let camera = Arc::new(CameraDevice::new(Box::new(camera_mock)).unwrap());

    let mount = Arc::new(MountDevice::new(Box::new(MockMotorPins::new()), vec![7, 11, 13, 15]).unwrap());

    let base_dir = tempfile::tempdir().unwrap();
    let scheduler = SessionScheduler::new(camera, mount.clone(), base_dir.path().to_path_buf());
    Rig {
        scheduler,
        camera_probe,
        mount,
        base_dir,
    }
}

/// Poll until the session leaves `Running` or the timeout expires.
fn wait_for_terminal(scheduler: &SessionScheduler, timeout: Duration) -> SessionStatusSnapshot {
    let deadline = Instant::now() + timeout;
    loop {
        let snapshot = scheduler.get_session_status();
        if snapshot.status != SessionStatus::Running && !snapshot.running {
            return snapshot;
        }
        assert!(
            Instant::now() < deadline,
            "session did not reach a terminal state, last status {:?}",
            snapshot.status
        );
        std::thread::sleep(Duration::from_millis(25));
    }
}

fn read_metadata(session_dir: &Path) -> serde_json::Value {
    let raw = std::fs::read_to_string(session_dir.join("session_metadata.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn test_session_completes_and_names_images() {
    let rig = make_rig();
    rig.scheduler
        .start_session(SessionRequest::new("m31", 2))
        .unwrap();

    let snapshot = wait_for_terminal(&rig.scheduler, Duration::from_secs(10));
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.images_captured, 2);
    assert_eq!(snapshot.progress, 100.0);

    let session_dir = rig.base_dir.path().join("m31");
    assert!(session_dir.join("image_0001.jpg").exists());
    assert!(session_dir.join("image_0002.jpg").exists());

    let metadata = read_metadata(&session_dir);
    assert_eq!(metadata["status"], "completed");
    assert_eq!(metadata["images_captured"], 2);
    assert!(metadata["end_time"].is_string());
}

#[test]
fn test_second_session_rejected_while_running() {
    let rig = make_rig();
    rig.scheduler
        .start_session(SessionRequest::new("first", 6))
        .unwrap();

    let result = rig.scheduler.start_session(SessionRequest::new("second", 3));
    assert!(matches!(result, Err(SessionError::AlreadyRunning)));

    // The running session is untouched by the rejection
    let snapshot = rig.scheduler.get_session_status();
    assert_eq!(snapshot.name, "first");
    assert_eq!(snapshot.total_images, 6);
    assert_eq!(snapshot.status, SessionStatus::Running);

    rig.scheduler.stop_session().unwrap();
}

#[test]
fn test_validation_rejections() {
    let rig = make_rig();

    let blank = rig.scheduler.start_session(SessionRequest::new("   ", 5));
    assert!(matches!(blank, Err(SessionError::EmptyName)));

    let none = rig.scheduler.start_session(SessionRequest::new("ok", 0));
    assert!(matches!(none, Err(SessionError::NoImages)));

    let mut timed = SessionRequest::new("ok", 5);
    timed.total_time_hours = Some(0.0);
    let bad_hours = rig.scheduler.start_session(timed);
    assert!(matches!(bad_hours, Err(SessionError::InvalidDuration)));

    assert_eq!(rig.scheduler.get_session_status().status, SessionStatus::Idle);
}

#[test]
fn test_capture_failure_drives_error_status() {
    let rig = make_rig();
    rig.camera_probe.set_fail_still(true);
    rig.scheduler
        .start_session(SessionRequest::new("doomed", 3))
        .unwrap();

    let snapshot = wait_for_terminal(&rig.scheduler, Duration::from_secs(10));
    assert_eq!(snapshot.status, SessionStatus::Error);
    // Frozen at the last successful count
    assert_eq!(snapshot.images_captured, 0);

    // A later manual stop never flips a terminal error to completed
    rig.scheduler.stop_session().unwrap();
    assert_eq!(
        rig.scheduler.get_session_status().status,
        SessionStatus::Error
    );
}

#[test]
fn test_stop_session_idempotent_after_completion() {
    let rig = make_rig();
    rig.scheduler
        .start_session(SessionRequest::new("single", 1))
        .unwrap();
    wait_for_terminal(&rig.scheduler, Duration::from_secs(10));

    let session_dir = rig.base_dir.path().join("single");
    let end_time_before = read_metadata(&session_dir)["end_time"].clone();

    rig.scheduler.stop_session().unwrap();
    rig.scheduler.stop_session().unwrap();

    let metadata = read_metadata(&session_dir);
    assert_eq!(metadata["status"], "completed");
    assert_eq!(metadata["end_time"], end_time_before);
}

#[test]
fn test_stop_mid_session_marks_completed() {
    let rig = make_rig();
    rig.scheduler
        .start_session(SessionRequest::new("cut-short", 20))
        .unwrap();
    std::thread::sleep(Duration::from_millis(700));

    rig.scheduler.stop_session().unwrap();

    let snapshot = rig.scheduler.get_session_status();
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert!(!snapshot.running);
    assert!(snapshot.images_captured < 20);
}

#[test]
fn test_session_stops_mount_tracking_it_started() {
    let rig = make_rig();
    let mut request = SessionRequest::new("tracked", 1);
    request.tracking_enabled = true;

    rig.scheduler.start_session(request).unwrap();
    wait_for_terminal(&rig.scheduler, Duration::from_secs(10));

    assert!(!rig.mount.is_tracking());
    let metadata = read_metadata(&rig.base_dir.path().join("tracked"));
    assert_eq!(metadata["mount_tracking_stopped"], true);
}

#[test]
fn test_concurrent_status_polls_stay_consistent() {
    let rig = make_rig();
    rig.scheduler
        .start_session(SessionRequest::new("polled", 3))
        .unwrap();

    let scheduler = &rig.scheduler;
    let done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                let snapshot = scheduler.get_session_status();
                assert!(snapshot.images_captured <= snapshot.total_images);
                assert!((0.0..=100.0).contains(&snapshot.progress));
                assert!(snapshot.elapsed_seconds >= 0.0);
            }
        });
        wait_for_terminal(scheduler, Duration::from_secs(10));
        done.store(true, Ordering::SeqCst);
    });

    assert_eq!(
        rig.scheduler.get_session_status().images_captured,
        3
    );
}

/// Mount whose stop call blocks long enough for a follow-up session to
/// start while the previous worker is still in its cleanup.
struct SlowStopMount {
    tracking: AtomicBool,
    stop_calls: AtomicU32,
}

impl SlowStopMount {
    fn new() -> Self {
        Self {
            tracking: AtomicBool::new(false),
            stop_calls: AtomicU32::new(0),
        }
    }
}

impl SessionMount for SlowStopMount {
    fn start_tracking(&self) -> bool {
        !self.tracking.swap(true, Ordering::SeqCst)
    }

    fn stop_tracking(&self) -> anyhow::Result<()> {
        std::thread::sleep(Duration::from_millis(800));
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.tracking.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }
}

#[test]
fn test_new_session_unaffected_by_previous_cleanup() {
    init_tracing();
    let camera_mock = MockCameraHandle::new(32, 24);
    let camera = Arc::new(CameraDevice::new(Box::new(camera_mock)).unwrap());
    let mount = Arc::new(SlowStopMount::new());
    let base_dir = tempfile::tempdir().unwrap();
    let scheduler = SessionScheduler::new(camera, mount.clone(), base_dir.path().to_path_buf());

    let mut first = SessionRequest::new("first", 1);
    first.tracking_enabled = true;
    scheduler.start_session(first).unwrap();
    wait_for_terminal(&scheduler, Duration::from_secs(10));

    // The first worker is now blocked inside the slow mount stop; a
    // session started in that window must run to its full image count.
    scheduler
        .start_session(SessionRequest::new("second", 4))
        .unwrap();
    let snapshot = wait_for_terminal(&scheduler, Duration::from_secs(15));
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.images_captured, 4);

    let metadata = read_metadata(&base_dir.path().join("second"));
    assert_eq!(metadata["images_captured"], 4);
    assert_eq!(metadata["status"], "completed");
    assert_eq!(metadata["mount_tracking_stopped"], false);
    assert_eq!(mount.stop_calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Fallback capture path (camera without a capture-to-path call)
// ---------------------------------------------------------------------------

struct UntargetedCamera {
    counter: AtomicU32,
    /// Simulates a capture call that reports success without producing a
    /// file.
    write_nothing: bool,
}

impl UntargetedCamera {
    fn new(write_nothing: bool) -> Self {
        Self {
            counter: AtomicU32::new(0),
            write_nothing,
        }
    }
}

impl SessionCamera for UntargetedCamera {
    fn capture_to(&self, _path: &Path) -> anyhow::Result<()> {
        anyhow::bail!("targeted capture not supported")
    }

    fn capture_untargeted(&self, dir: &Path) -> anyhow::Result<()> {
        if self.write_nothing {
            return Ok(());
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        std::fs::write(dir.join(format!("scratch_{n}.jpg")), b"frame")?;
        Ok(())
    }

    fn supports_targeted_capture(&self) -> bool {
        false
    }
}

struct IdleMount;

impl SessionMount for IdleMount {
    fn start_tracking(&self) -> bool {
        false
    }

    fn stop_tracking(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_tracking(&self) -> bool {
        false
    }
}

#[test]
fn test_fallback_capture_renames_newest_file() {
    init_tracing();
    let base_dir = tempfile::tempdir().unwrap();
    let scheduler = SessionScheduler::new(
        Arc::new(UntargetedCamera::new(false)),
        Arc::new(IdleMount),
        base_dir.path().to_path_buf(),
    );
    assert_eq!(scheduler.capture_binding(), CaptureBinding::RenameNewest);

    scheduler
        .start_session(SessionRequest::new("fallback", 2))
        .unwrap();
    let snapshot = wait_for_terminal(&scheduler, Duration::from_secs(10));

    assert_eq!(snapshot.status, SessionStatus::Completed);
    let session_dir = base_dir.path().join("fallback");
    assert!(session_dir.join("image_0001.jpg").exists());
    assert!(session_dir.join("image_0002.jpg").exists());
}

#[test]
fn test_fallback_with_no_file_is_a_failure() {
    init_tracing();
    let base_dir = tempfile::tempdir().unwrap();
    let scheduler = SessionScheduler::new(
        Arc::new(UntargetedCamera::new(true)),
        Arc::new(IdleMount),
        base_dir.path().to_path_buf(),
    );

    scheduler
        .start_session(SessionRequest::new("phantom", 1))
        .unwrap();
    let snapshot = wait_for_terminal(&scheduler, Duration::from_secs(10));
    assert_eq!(snapshot.status, SessionStatus::Error);
}
