//! Agent configuration from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use pocketclaude_core::home_directory;

/// Command written into a fresh PTY to launch the assistant CLI.
const DEFAULT_LAUNCH_COMMAND: &str = "claude";

/// Runtime configuration, resolved once at startup.
///
/// `RELAY_URL` and `RELAY_TOKEN` are required; `QUICK_SESSION_PATH`
/// defaults to the user's home and `CLAUDE_PATH` overrides the assistant
/// launch command.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub relay_url: String,
    pub token: String,
    pub quick_path: PathBuf,
    pub launch_command: String,
    pub projects_path: PathBuf,
    pub tuning: SessionTuning,
}

/// Timing knobs for PTY sessions.
///
/// The assistant CLI sometimes swallows a submit, so `send_input` taps
/// Enter a second time after a short delay. Both the delay and the tap
/// itself are tunable; the defaults match observed behavior.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// Send a second carriage return after `send_input`.
    pub double_tap: bool,
    /// Delay before the second carriage return.
    pub double_tap_delay: Duration,
    /// Delay between PTY spawn and writing the launch command.
    pub launch_delay: Duration,
    pub cols: u16,
    pub rows: u16,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            double_tap: true,
            double_tap_delay: Duration::from_millis(100),
            launch_delay: Duration::from_millis(500),
            cols: 120,
            rows: 30,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let relay_url = std::env::var("RELAY_URL").context("RELAY_URL must be set")?;
        let token = std::env::var("RELAY_TOKEN").context("RELAY_TOKEN must be set")?;

        let quick_path = match std::env::var("QUICK_SESSION_PATH") {
            Ok(raw) => PathBuf::from(shellexpand::tilde(&raw).into_owned()),
            Err(_) => home_directory().context("cannot resolve a home directory")?,
        };

        let launch_command =
            std::env::var("CLAUDE_PATH").unwrap_or_else(|_| DEFAULT_LAUNCH_COMMAND.to_string());

        Ok(Self {
            relay_url,
            token,
            quick_path,
            launch_command,
            projects_path: default_projects_path(),
            tuning: SessionTuning::default(),
        })
    }
}

/// `projects.json` lives next to the agent binary; fall back to the
/// working directory when the executable path is unavailable.
fn default_projects_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("projects.json")))
        .unwrap_or_else(|| PathBuf::from("projects.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_defaults_match_observed_cli_behavior() {
        let tuning = SessionTuning::default();
        assert!(tuning.double_tap);
        assert_eq!(tuning.double_tap_delay, Duration::from_millis(100));
        assert_eq!(tuning.launch_delay, Duration::from_millis(500));
        assert_eq!((tuning.cols, tuning.rows), (120, 30));
    }

    #[test]
    fn projects_path_is_named_projects_json() {
        assert_eq!(
            default_projects_path().file_name().unwrap(),
            "projects.json"
        );
    }
}
