//! The agent's `memory.json`: user preferences and a recent-context cache.
//!
//! Version-tagged JSON under `<home>/.pocketclaude/memory.json`. Loading is
//! tolerant (missing, corrupt, or future-versioned files yield defaults)
//! and saving is best-effort.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pocketclaude_core::data_dir;

pub const MEMORY_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFile {
    pub version: u32,
    /// Free-form user preferences; the agent only round-trips these.
    #[serde(default)]
    pub preferences: serde_json::Map<String, serde_json::Value>,
    /// Per-project pointer to the most recent session.
    #[serde(default)]
    pub recent: HashMap<String, RecentProject>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecentProject {
    pub last_session_id: String,
    pub last_session_ms: i64,
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self {
            version: MEMORY_VERSION,
            preferences: serde_json::Map::new(),
            recent: HashMap::new(),
        }
    }
}

impl MemoryFile {
    pub fn default_path() -> Option<PathBuf> {
        data_dir().map(|d| d.join("memory.json"))
    }

    /// Load from `path`, falling back to defaults on any problem.
    pub fn load_from(path: &PathBuf) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                debug!("no memory file at {}", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str::<MemoryFile>(&contents) {
            Ok(memory) if memory.version == MEMORY_VERSION => memory,
            Ok(memory) => {
                warn!(
                    "memory file {} has version {}, expected {MEMORY_VERSION}; starting fresh",
                    path.display(),
                    memory.version
                );
                Self::default()
            }
            Err(e) => {
                warn!("failed to parse {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Save to `path`, creating parent directories. Best-effort.
    pub fn save_to(&self, path: &PathBuf) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("cannot create {}: {e}", parent.display());
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!("cannot write {}: {e}", path.display());
                }
            }
            Err(e) => warn!("cannot serialize memory file: {e}"),
        }
    }

    /// Record the newest session for a project.
    pub fn note_session(&mut self, project_id: &str, session_id: &str, started_ms: i64) {
        self.recent.insert(
            project_id.to_string(),
            RecentProject {
                last_session_id: session_id.to_string(),
                last_session_ms: started_ms,
            },
        );
    }
}
