//! Project configuration, loaded once at agent startup from `projects.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Reserved project id for sessions rooted at the user's home directory.
pub const QUICK_SESSION_ID: &str = "__quick__";

/// A named working directory plus optional matching hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tech_stack: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// On-disk shape of `projects.json`.
#[derive(Debug, Clone, Default, Deserialize)]
struct ProjectsFile {
    #[serde(default)]
    projects: Vec<Project>,
}

#[derive(Debug, Error)]
pub enum ProjectConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The resolution of a `start_session` project reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProject {
    pub id: String,
    pub path: PathBuf,
    pub is_quick: bool,
}

/// Immutable registry of configured projects.
///
/// Loaded once at startup; the quick-session path is supplied separately
/// (from `QUICK_SESSION_PATH` or the user's home directory).
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    projects: Vec<Project>,
    quick_path: PathBuf,
}

impl ProjectRegistry {
    pub fn new(projects: Vec<Project>, quick_path: PathBuf) -> Self {
        Self {
            projects,
            quick_path,
        }
    }

    /// Load the registry from a `projects.json` file.
    ///
    /// A missing file yields an empty registry (quick sessions still work);
    /// a malformed file is an error.
    pub fn load(path: &Path, quick_path: PathBuf) -> Result<Self, ProjectConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("no projects file at {}, starting empty", path.display());
                return Ok(Self::new(Vec::new(), quick_path));
            }
            Err(source) => {
                return Err(ProjectConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let file: ProjectsFile =
            serde_json::from_str(&contents).map_err(|source| ProjectConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self::new(file.projects, quick_path))
    }

    pub fn all(&self) -> &[Project] {
        &self.projects
    }

    pub fn get(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn quick_path(&self) -> &Path {
        &self.quick_path
    }

    /// Resolve a `start_session` project reference.
    ///
    /// `None` or the `__quick__` sentinel synthesize the quick-session
    /// project. An unknown id returns `None` (→ `PROJECT_NOT_FOUND`).
    pub fn resolve(&self, project_id: Option<&str>) -> Option<ResolvedProject> {
        match project_id {
            None => Some(self.quick_project()),
            Some(QUICK_SESSION_ID) => Some(self.quick_project()),
            Some(id) => self.get(id).map(|p| ResolvedProject {
                id: p.id.clone(),
                path: p.path.clone(),
                is_quick: false,
            }),
        }
    }

    fn quick_project(&self) -> ResolvedProject {
        ResolvedProject {
            id: QUICK_SESSION_ID.to_string(),
            path: self.quick_path.clone(),
            is_quick: true,
        }
    }
}
