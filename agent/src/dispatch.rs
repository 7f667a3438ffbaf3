//! Command dispatch: one forwarded client command in, at most one reply
//! envelope out. Output streaming and close announcements travel on the
//! uplink channel independently of replies.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use pocketclaude_core::protocol::{codes, CommandPayload, Envelope, StatusKind};

use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::session::manager::{SessionManager, StartSessionError};
use crate::upload;

pub struct Dispatcher {
    manager: Arc<SessionManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Route a command to its handler. `None` means the command succeeded
    /// with no direct reply (its effects stream separately).
    pub async fn dispatch(&self, payload: CommandPayload) -> Option<Envelope> {
        debug!("dispatching command: {}", payload.command);
        match payload.command.as_str() {
            "list_projects" => Some(self.list_projects()),
            "list_sessions" => Some(self.list_sessions().await),
            "start_session" => Some(self.start_session(&payload).await),
            "send_input" => self.send_input(&payload).await,
            "close_session" => self.close_session(&payload).await,
            "keepalive" => self.keepalive(&payload).await,
            "get_session_history" => Some(self.session_history(&payload)),
            "get_last_session_output" => Some(self.last_session_output(&payload)),
            "upload_file" => Some(self.upload_file(&payload).await),
            other => {
                warn!("unknown command: {other}");
                Some(Envelope::error(
                    codes::UNKNOWN_COMMAND,
                    format!("unknown command: {other}"),
                ))
            }
        }
    }

    fn list_projects(&self) -> Envelope {
        Envelope::status(
            StatusKind::ProjectsList,
            Some(json!({ "projects": self.manager.registry().all() })),
        )
    }

    async fn list_sessions(&self) -> Envelope {
        Envelope::status(
            StatusKind::SessionsList,
            Some(json!({ "sessions": self.manager.list().await })),
        )
    }

    async fn start_session(&self, payload: &CommandPayload) -> Envelope {
        match self.manager.start_session(payload.project_id.as_deref()).await {
            Ok(started) => Envelope::session_status(
                StatusKind::SessionStarted,
                started.session_id.clone(),
                Some(json!({
                    "sessionId": started.session_id,
                    "projectId": started.project_id,
                    "isQuickSession": started.is_quick,
                    "hasPreviousContext": started.has_previous_context,
                })),
            ),
            Err(StartSessionError::ProjectNotFound(id)) => Envelope::error(
                codes::PROJECT_NOT_FOUND,
                format!("unknown project: {id}"),
            ),
            Err(StartSessionError::Spawn(e)) => {
                warn!("session spawn failed: {e}");
                Envelope::error(codes::SESSION_START_FAILED, e.to_string())
            }
        }
    }

    async fn send_input(&self, payload: &CommandPayload) -> Option<Envelope> {
        let Some(session_id) = payload.session_id.as_deref() else {
            return Some(missing(codes::MISSING_SESSION_ID, "sessionId"));
        };
        let Some(input) = payload.input.as_deref() else {
            return Some(missing(codes::MISSING_INPUT, "input"));
        };
        match self.manager.send_input(session_id, input).await {
            Ok(()) => None,
            Err(()) => Some(session_not_found(session_id)),
        }
    }

    async fn close_session(&self, payload: &CommandPayload) -> Option<Envelope> {
        let Some(session_id) = payload.session_id.as_deref() else {
            return Some(missing(codes::MISSING_SESSION_ID, "sessionId"));
        };
        if self.manager.close_session(session_id).await {
            // The session_closed status is announced on the uplink path.
            None
        } else {
            Some(session_not_found(session_id))
        }
    }

    async fn keepalive(&self, payload: &CommandPayload) -> Option<Envelope> {
        let Some(session_id) = payload.session_id.as_deref() else {
            return Some(missing(codes::MISSING_SESSION_ID, "sessionId"));
        };
        match self.manager.keepalive(session_id).await {
            Ok(()) => None,
            Err(()) => Some(session_not_found(session_id)),
        }
    }

    fn session_history(&self, payload: &CommandPayload) -> Envelope {
        let Some(project_id) = payload.project_id.as_deref() else {
            return missing(codes::MISSING_PROJECT_ID, "projectId");
        };
        let history = self
            .manager
            .history()
            .summaries(project_id, DEFAULT_HISTORY_LIMIT);
        Envelope::status(
            StatusKind::SessionHistory,
            Some(json!({ "projectId": project_id, "history": history })),
        )
    }

    fn last_session_output(&self, payload: &CommandPayload) -> Envelope {
        let Some(project_id) = payload.project_id.as_deref() else {
            return missing(codes::MISSING_PROJECT_ID, "projectId");
        };
        let output = self
            .manager
            .history()
            .last_session_output(project_id)
            .unwrap_or_default();
        Envelope::status(
            StatusKind::LastSessionOutput,
            Some(json!({ "projectId": project_id, "output": output })),
        )
    }

    async fn upload_file(&self, payload: &CommandPayload) -> Envelope {
        let Some(session_id) = payload.session_id.as_deref() else {
            return session_not_found("(missing)");
        };
        let (Some(file_name), Some(file_content)) =
            (payload.file_name.as_deref(), payload.file_content.as_deref())
        else {
            return Envelope::error(
                codes::MISSING_FILE_DATA,
                "upload_file requires fileName and fileContent",
            );
        };

        let Some(working_dir) = self.manager.working_dir(session_id).await else {
            return session_not_found(session_id);
        };

        match upload::save_upload(&working_dir, file_name, file_content) {
            Ok(saved) => Envelope::session_status(
                StatusKind::FileUploaded,
                session_id,
                Some(json!({
                    "fileName": saved.file_name,
                    "filePath": saved.path.to_string_lossy(),
                    "size": saved.size,
                })),
            ),
            Err(e) => {
                warn!("upload into {} failed: {e}", working_dir.display());
                Envelope::error(codes::UPLOAD_FAILED, e.to_string())
            }
        }
    }
}

fn missing(code: &str, field: &str) -> Envelope {
    Envelope::error(code, format!("{field} is required"))
}

fn session_not_found(session_id: &str) -> Envelope {
    Envelope::error(
        codes::SESSION_NOT_FOUND,
        format!("no session with id {session_id}"),
    )
}
