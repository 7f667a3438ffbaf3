use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The JSON frame carrying every protocol message.
///
/// Serialized shape:
///
/// ```json
/// { "type": "output",
///   "sessionId": "…",
///   "payload": { "sessionId": "…", "data": "…" },
///   "timestamp": 1759430400000 }
/// ```
///
/// `timestamp` is assigned by the sender at construction time, in
/// milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub body: Body,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

/// Envelope body, adjacently tagged on the wire: the `type` field selects
/// the variant, the `payload` field carries its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Body {
    Auth(AuthPayload),
    Command(CommandPayload),
    Output(OutputPayload),
    Status(StatusPayload),
    Error(ErrorPayload),
}

/// Peer role declared during authentication.
///
/// Unrecognized role strings deserialize to [`Role::Unknown`] so the relay
/// can answer with `INVALID_ROLE` instead of a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Client,
    Unknown,
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "agent" => Role::Agent,
            "client" => Role::Client,
            _ => Role::Unknown,
        })
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Client => "client",
            Role::Unknown => "unknown",
        }
    }
}

/// First frame on every connection: `{ token, role }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
    pub role: Role,
}

/// A client command. All fields except `command` are optional; the agent
/// validates presence per command and answers with the matching
/// `MISSING_*` code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Base64-encoded file bytes for `upload_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl CommandPayload {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }
}

/// A raw PTY output chunk. `data` is the chunk as a string; multi-byte
/// sequences may be split across frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPayload {
    pub session_id: String,
    pub data: String,
}

/// Status notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Connected,
    Disconnected,
    SessionStarted,
    SessionClosed,
    ProjectsList,
    SessionsList,
    SessionHistory,
    LastSessionOutput,
    FileUploaded,
    ContextSummary,
}

/// A status notification with optional structured data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// An error reply. `code` is one of the [`codes`](super::codes) constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl Envelope {
    /// Wrap a body, stamping the current time.
    pub fn new(body: Body) -> Self {
        Self {
            body,
            session_id: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Set the top-level `sessionId` field.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn auth(token: impl Into<String>, role: Role) -> Self {
        Self::new(Body::Auth(AuthPayload {
            token: token.into(),
            role,
        }))
    }

    pub fn command(payload: CommandPayload) -> Self {
        Self::new(Body::Command(payload))
    }

    pub fn output(session_id: impl Into<String>, data: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self::new(Body::Output(OutputPayload {
            session_id: session_id.clone(),
            data: data.into(),
        }))
        .with_session(session_id)
    }

    pub fn status(status: StatusKind, data: Option<Value>) -> Self {
        Self::new(Body::Status(StatusPayload {
            status,
            data,
            session_id: None,
        }))
    }

    /// A status notification scoped to one session.
    pub fn session_status(
        status: StatusKind,
        session_id: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let session_id = session_id.into();
        Self::new(Body::Status(StatusPayload {
            status,
            data,
            session_id: Some(session_id.clone()),
        }))
        .with_session(session_id)
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(Body::Error(ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        }))
    }

    /// Serialize to the single-line JSON form sent on the wire.
    pub fn to_json(&self) -> String {
        // Serialization of these types cannot fail: no non-string map keys,
        // no non-serializable values.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a wire frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
