//! The live-session table and everything that mutates it.
//!
//! Sessions live in a `HashMap` behind a `tokio::sync::Mutex`. PTY reader
//! threads post [`SessionEvent`]s to the manager's pump task; all table
//! mutation happens on the command path, the pump, or the idle reaper.
//! Output envelopes only go upstream while the uplink is authenticated;
//! disk logs and ring buffers always receive the bytes.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pocketclaude_core::output::LineRingBuffer;
use pocketclaude_core::projects::ProjectRegistry;
use pocketclaude_core::protocol::{Envelope, StatusKind};

use crate::config::SessionTuning;
use crate::history::HistoryStore;
use crate::memory::MemoryFile;
use crate::session::pty::{self, PtyError};
use crate::session::types::{Session, SessionEvent, SessionSnapshot, SessionStatus, RING_CAPACITY};

/// Sessions idle longer than this are closed by the reaper.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Reaper scan cadence.
pub const REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Sessions quiet for one scan interval are marked idle (not closed).
const IDLE_AFTER: Duration = REAP_INTERVAL;

#[derive(Debug, thiserror::Error)]
pub enum StartSessionError {
    #[error("unknown project: {0}")]
    ProjectNotFound(String),
    #[error(transparent)]
    Spawn(#[from] PtyError),
}

/// Reply data for a successful `start_session`.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session_id: String,
    pub project_id: String,
    pub is_quick: bool,
    pub has_previous_context: bool,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    registry: ProjectRegistry,
    history: HistoryStore,
    memory: Mutex<MemoryFile>,
    memory_path: Option<PathBuf>,
    tuning: SessionTuning,
    launch_command: String,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    uplink_tx: mpsc::UnboundedSender<Envelope>,
    authenticated: Arc<AtomicBool>,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl SessionManager {
    /// Build the manager and the event channel its pump will drain.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: ProjectRegistry,
        history: HistoryStore,
        memory_path: Option<PathBuf>,
        tuning: SessionTuning,
        launch_command: String,
        uplink_tx: mpsc::UnboundedSender<Envelope>,
        authenticated: Arc<AtomicBool>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let memory = memory_path
            .as_ref()
            .map(MemoryFile::load_from)
            .unwrap_or_default();
        let manager = Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            registry,
            history,
            memory: Mutex::new(memory),
            memory_path,
            tuning,
            launch_command,
            events_tx,
            uplink_tx,
            authenticated,
        });
        (manager, events_rx)
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    fn authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Send an envelope upstream if the uplink is live. Frames produced
    /// while disconnected are dropped here, so clients never see replay.
    fn send_upstream(&self, envelope: Envelope) {
        if self.authenticated() {
            let _ = self.uplink_tx.send(envelope);
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start a session for a project (or a quick session).
    ///
    /// Enforces one session per project id by closing any prior session
    /// first. The assistant launch command (preceded by previous-session
    /// context, when available) is written after a short settling delay.
    pub async fn start_session(
        self: &Arc<Self>,
        project_id: Option<&str>,
    ) -> Result<StartedSession, StartSessionError> {
        let resolved = self.registry.resolve(project_id).ok_or_else(|| {
            StartSessionError::ProjectNotFound(project_id.unwrap_or_default().to_string())
        })?;

        // One session per project: close the incumbent before spawning.
        let existing: Option<String> = {
            let sessions = self.sessions.lock().await;
            sessions
                .values()
                .find(|s| s.project_id == resolved.id)
                .map(|s| s.id.clone())
        };
        if let Some(old_id) = existing {
            info!(
                "closing session {old_id} before starting a new one for {}",
                resolved.id
            );
            self.close_session(&old_id).await;
        }

        let context = self.history.context_summary(&resolved.id);
        let started_at = now_ms();

        let (handle, reader) =
            pty::spawn_shell(&resolved.path, self.tuning.cols, self.tuning.rows)?;

        let session_id = Uuid::new_v4().to_string();
        let history = self
            .history
            .create_writer(&resolved.id, &session_id, started_at);

        spawn_reader(
            session_id.clone(),
            reader,
            handle.alive_flag(),
            self.events_tx.clone(),
        );

        let session = Session {
            id: session_id.clone(),
            project_id: resolved.id.clone(),
            working_dir: resolved.path.clone(),
            status: SessionStatus::Active,
            ring: LineRingBuffer::new(RING_CAPACITY),
            last_activity: started_at,
            started_at,
            pty: handle,
            history,
        };
        self.sessions.lock().await.insert(session_id.clone(), session);

        self.note_recent(&resolved.id, &session_id, started_at).await;
        self.schedule_launch(session_id.clone(), context.clone());

        info!("session {session_id} started for project {}", resolved.id);
        Ok(StartedSession {
            session_id,
            project_id: resolved.id,
            is_quick: resolved.is_quick,
            has_previous_context: !context.is_empty(),
        })
    }

    /// After the settling delay, write prior context (if any) and the
    /// assistant launch command into the PTY.
    fn schedule_launch(self: &Arc<Self>, session_id: String, context: String) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(manager.tuning.launch_delay).await;
            let sessions = manager.sessions.lock().await;
            let Some(session) = sessions.get(&session_id) else {
                return; // closed before the shell settled
            };
            if !context.is_empty() {
                if let Err(e) = session
                    .pty
                    .write(format!("{context}\r").as_bytes())
                {
                    warn!("context injection failed for {session_id}: {e}");
                }
            }
            let launch = format!("{}\r", manager.launch_command);
            if let Err(e) = session.pty.write(launch.as_bytes()) {
                warn!("launch command failed for {session_id}: {e}");
            }
        });
    }

    /// Write user input plus a carriage return, then (when tuned on) a
    /// second return shortly after (the CLI sometimes needs two submits).
    pub async fn send_input(self: &Arc<Self>, session_id: &str, input: &str) -> Result<(), ()> {
        {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.get_mut(session_id).ok_or(())?;
            session.touch(now_ms());
            let mut bytes = input.as_bytes().to_vec();
            bytes.push(b'\r');
            if let Err(e) = session.pty.write(&bytes) {
                warn!("input write failed for {session_id}: {e}");
            }
        }

        if self.tuning.double_tap {
            let manager = Arc::clone(self);
            let id = session_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(manager.tuning.double_tap_delay).await;
                // The session may have closed while we slept.
                let sessions = manager.sessions.lock().await;
                if let Some(session) = sessions.get(&id) {
                    let _ = session.pty.write(b"\r");
                }
            });
        }
        Ok(())
    }

    /// Refresh `lastActivity` without touching the PTY.
    pub async fn keepalive(&self, session_id: &str) -> Result<(), ()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(session_id).ok_or(())?;
        session.touch(now_ms());
        Ok(())
    }

    /// Kill the PTY, finalize history, and announce `session_closed`.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(session_id);
        let Some(mut session) = removed else {
            return false;
        };
        session.pty.kill();
        session.history.finalize(now_ms());
        info!(
            "session {session_id} closed (project {})",
            session.project_id
        );
        self.send_upstream(Envelope::session_status(
            StatusKind::SessionClosed,
            session_id,
            Some(json!({
                "sessionId": session_id,
                "projectId": session.project_id,
            })),
        ));
        true
    }

    /// Close everything; used at shutdown so history files are finalized.
    pub async fn close_all(&self) {
        let ids: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions.keys().cloned().collect()
        };
        for id in ids {
            self.close_session(&id).await;
        }
    }

    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.lock().await;
        let mut snapshots: Vec<SessionSnapshot> =
            sessions.values().map(Session::snapshot).collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        snapshots
    }

    /// The working directory of a live session (for uploads).
    pub async fn working_dir(&self, session_id: &str) -> Option<PathBuf> {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(|s| s.working_dir.clone())
    }

    async fn note_recent(&self, project_id: &str, session_id: &str, started_ms: i64) {
        let mut memory = self.memory.lock().await;
        memory.note_session(project_id, session_id, started_ms);
        if let Some(path) = &self.memory_path {
            memory.save_to(path);
        }
    }

    // ── Output pipeline ────────────────────────────────────────────

    /// Drain PTY events: buffer, log, and stream output; route exits
    /// through the normal close path.
    pub async fn run_event_pump(
        self: Arc<Self>,
        mut events_rx: mpsc::UnboundedReceiver<SessionEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events_rx.recv() => match event {
                    None => break,
                    Some(SessionEvent::Output { session_id, data }) => {
                        self.on_output(&session_id, &data).await;
                    }
                    Some(SessionEvent::Exited { session_id }) => {
                        debug!("PTY for session {session_id} exited");
                        self.close_session(&session_id).await;
                    }
                },
            }
        }
    }

    async fn on_output(&self, session_id: &str, data: &[u8]) {
        {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(session_id) else {
                return; // output raced a close
            };
            session.touch(now_ms());
            session.ring.push_bytes(data);
            session.history.append(data);
        }
        self.send_upstream(Envelope::output(
            session_id,
            String::from_utf8_lossy(data).into_owned(),
        ));
    }

    // ── Idle reaper ────────────────────────────────────────────────

    /// One reaper pass at the given clock: mark quiet sessions idle and
    /// close those idle past the timeout. Returns the closed ids.
    pub async fn reap_idle(&self, now_ms: i64) -> Vec<String> {
        let mut expired = Vec::new();
        {
            let mut sessions = self.sessions.lock().await;
            for session in sessions.values_mut() {
                let quiet_for = now_ms.saturating_sub(session.last_activity);
                if quiet_for > IDLE_TIMEOUT.as_millis() as i64 {
                    expired.push(session.id.clone());
                } else if quiet_for > IDLE_AFTER.as_millis() as i64 {
                    session.status = SessionStatus::Idle;
                }
            }
        }
        for id in &expired {
            info!("reaping idle session {id}");
            self.close_session(id).await;
        }
        expired
    }

    /// Periodic reaper task; the scan interval is the only pacing.
    pub async fn run_idle_reaper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        ticker.tick().await; // immediate first tick is not a scan
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.reap_idle(now_ms()).await;
                }
            }
        }
    }
}

/// Blocking PTY reads happen on a dedicated thread per session; chunks are
/// posted back to the pump. EOF or a read error ends the session.
fn spawn_reader(
    session_id: String,
    mut reader: Box<dyn Read + Send>,
    alive: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let event = SessionEvent::Output {
                        session_id: session_id.clone(),
                        data: buf[..n].to_vec(),
                    };
                    if events_tx.send(event).is_err() {
                        return; // pump gone; agent is shutting down
                    }
                }
            }
        }
        alive.store(false, Ordering::SeqCst);
        let _ = events_tx.send(SessionEvent::Exited { session_id });
    });
}
