//! Protocol error codes and WebSocket close codes.

/// A frame could not be parsed as a JSON envelope.
pub const INVALID_JSON: &str = "INVALID_JSON";

/// The auth token did not match the shared secret.
pub const AUTH_FAILED: &str = "AUTH_FAILED";

/// A non-auth frame arrived before authentication completed.
pub const NOT_AUTHENTICATED: &str = "NOT_AUTHENTICATED";

/// An agent is already bound to the relay.
pub const AGENT_EXISTS: &str = "AGENT_EXISTS";

/// The auth payload carried a role other than `agent` or `client`.
pub const INVALID_ROLE: &str = "INVALID_ROLE";

/// A command arrived while no agent is bound.
pub const NO_AGENT: &str = "NO_AGENT";

/// The command name is not in the dispatch table.
pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";

/// No project with the given id is configured.
pub const PROJECT_NOT_FOUND: &str = "PROJECT_NOT_FOUND";

/// The command requires a `projectId` and none was given.
pub const MISSING_PROJECT_ID: &str = "MISSING_PROJECT_ID";

/// The command requires a `sessionId` and none was given.
pub const MISSING_SESSION_ID: &str = "MISSING_SESSION_ID";

/// The command requires an `input` string and none was given.
pub const MISSING_INPUT: &str = "MISSING_INPUT";

/// No live session with the given id.
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";

/// `upload_file` is missing `fileName` or `fileContent`.
pub const MISSING_FILE_DATA: &str = "MISSING_FILE_DATA";

/// The upload could not be decoded or written.
pub const UPLOAD_FAILED: &str = "UPLOAD_FAILED";

/// The agent has no session manager attached (internal fault).
pub const NO_SESSION_MANAGER: &str = "NO_SESSION_MANAGER";

/// The PTY could not be spawned; no session was created.
pub const SESSION_START_FAILED: &str = "SESSION_START_FAILED";

// WebSocket close codes.

/// Authentication failure or frame before auth.
pub const CLOSE_AUTH_FAILURE: u16 = 4001;

/// A healthy agent is already connected.
pub const CLOSE_AGENT_EXISTS: u16 = 4002;

/// The auth payload carried an unrecognized role.
pub const CLOSE_INVALID_ROLE: u16 = 4003;
