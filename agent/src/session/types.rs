//! Session records and their read-only snapshots.

use std::path::PathBuf;

use serde::Serialize;

use pocketclaude_core::output::LineRingBuffer;

use crate::history::HistoryWriter;
use crate::session::pty::PtyHandle;

/// Lines of recent output retained per session.
pub const RING_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
}

/// A live PTY bound to a project.
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub working_dir: PathBuf,
    pub status: SessionStatus,
    pub ring: LineRingBuffer,
    /// Milliseconds since epoch; nondecreasing while the session is active.
    pub last_activity: i64,
    pub started_at: i64,
    pub pty: PtyHandle,
    pub history: HistoryWriter,
}

impl Session {
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            project_id: self.project_id.clone(),
            working_dir: self.working_dir.to_string_lossy().into_owned(),
            status: self.status,
            last_activity: self.last_activity,
            started_at: self.started_at,
        }
    }

    pub fn touch(&mut self, now_ms: i64) {
        // Keep lastActivity monotone even if the caller's clock stepped back.
        self.last_activity = self.last_activity.max(now_ms);
        self.status = SessionStatus::Active;
    }
}

/// What `list_sessions` reports per session.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub project_id: String,
    pub working_dir: String,
    pub status: SessionStatus,
    pub last_activity: i64,
    pub started_at: i64,
}

/// Events posted by PTY reader threads to the manager's pump.
#[derive(Debug)]
pub enum SessionEvent {
    Output { session_id: String, data: Vec<u8> },
    Exited { session_id: String },
}
