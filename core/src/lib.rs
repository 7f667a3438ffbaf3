pub mod backoff;
pub mod output;
pub mod projects;
pub mod protocol;

use std::path::PathBuf;

/// Return the user's home directory.
///
/// On Unix, reads `$HOME`. On Windows, reads `$USERPROFILE`.
pub fn home_directory() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
}

/// Name of the per-user data directory under the home directory.
pub const DATA_DIR_NAME: &str = ".pocketclaude";

/// Resolve `<home>/.pocketclaude`, the agent's on-disk data root.
pub fn data_dir() -> Option<PathBuf> {
    home_directory().map(|h| h.join(DATA_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_directory_returns_some() {
        assert!(home_directory().is_some());
    }

    #[test]
    fn data_dir_ends_with_dot_pocketclaude() {
        let dir = data_dir().unwrap();
        assert!(dir.ends_with(DATA_DIR_NAME));
    }
}
