//! JSON sidecar persistence for session state.
//!
//! The sidecar is rewritten in full after every state change. A failed
//! write must never take down the worker loop or a status call, so
//! failures are logged and swallowed here.

use crate::config::SessionConfig;
use std::path::PathBuf;
use tracing::warn;

/// Sidecar filename inside the session directory.
pub const METADATA_FILENAME: &str = "session_metadata.json";

/// Path of the sidecar for a given session.
pub fn metadata_path(session: &SessionConfig) -> PathBuf {
    session.session_dir.join(METADATA_FILENAME)
}

/// Rewrite the sidecar from the current session state.
///
/// No-op for the idle placeholder config (no session directory yet).
pub fn persist(session: &SessionConfig) {
    if session.session_dir.as_os_str().is_empty() {
        return;
    }
    let path = metadata_path(session);
    match serde_json::to_string_pretty(session) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                warn!("failed to write session metadata {}: {e}", path.display());
            }
        }
        Err(e) => warn!("failed to serialize session metadata: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionRequest, SessionStatus};

    #[test]
    fn test_persist_writes_full_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let request = SessionRequest::new("ngc253", 10);
        let mut session = SessionConfig::from_request(&request, dir.path().to_path_buf());
        session.images_captured = 3;

        persist(&session);

        let raw = std::fs::read_to_string(dir.path().join(METADATA_FILENAME)).unwrap();
        let reloaded: SessionConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(reloaded.name, "ngc253");
        assert_eq!(reloaded.images_captured, 3);
        assert_eq!(reloaded.status, SessionStatus::Running);
    }

    #[test]
    fn test_persist_skips_idle_config() {
        // Must not panic or write anywhere
        persist(&SessionConfig::idle());
    }

    #[test]
    fn test_persist_tolerates_missing_directory() {
        let request = SessionRequest::new("gone", 1);
        let session =
            SessionConfig::from_request(&request, "/nonexistent/session/dir".into());
        // Logged warning, no panic, no error surfaced
        persist(&session);
    }
}
