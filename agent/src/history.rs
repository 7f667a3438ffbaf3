//! On-disk session history: per-project raw output logs and JSON
//! summaries, plus the context string injected into new sessions.
//!
//! Layout: `<root>/<projectId>/<epochMs>-<sessionId>.log` paired with
//! `<epochMs>-<sessionId>.summary.json`. Filenames sort newest-last by
//! construction, so queries sort descending by name.
//!
//! All writes are best-effort: a session never fails because its history
//! cannot be recorded.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pocketclaude_core::data_dir;

/// Bytes of log tail kept as the summary preview.
const PREVIEW_BYTES: u64 = 500;

/// Default number of summaries returned by history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Number of recent previews concatenated into the context string.
const CONTEXT_SESSIONS: usize = 3;

const CONTEXT_HEADER: &str = "=== Previous Session Context ===";
const CONTEXT_FOOTER: &str = "=== End of Previous Context ===";

/// One session's summary, as stored in `.summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub preview: String,
}

/// Root of the history tree, `<home>/.pocketclaude/history` by default.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    root: PathBuf,
}

impl HistoryStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn default_root() -> Option<PathBuf> {
        data_dir().map(|d| d.join("history"))
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    /// Open the log/summary pair for a new session.
    ///
    /// If the directory cannot be created or the log cannot be opened, the
    /// writer is returned disabled: the session runs without a disk log.
    pub fn create_writer(
        &self,
        project_id: &str,
        session_id: &str,
        start_ms: i64,
    ) -> HistoryWriter {
        let dir = self.project_dir(project_id);
        let stem = format!("{start_ms}-{session_id}");
        let log_path = dir.join(format!("{stem}.log"));
        let summary_path = dir.join(format!("{stem}.summary.json"));

        let file = std::fs::create_dir_all(&dir)
            .and_then(|_| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&log_path)
            })
            .map_err(|e| {
                warn!(
                    "history disabled for session {session_id}: cannot open {}: {e}",
                    log_path.display()
                );
            })
            .ok();

        let mut writer = HistoryWriter {
            log_path,
            summary_path,
            file,
            session_id: session_id.to_string(),
            start_ms,
            finalized: false,
        };
        writer.write_summary(None);
        writer
    }

    /// The newest `limit` summaries for a project, newest first.
    pub fn summaries(&self, project_id: &str, limit: usize) -> Vec<SessionSummary> {
        self.files_with_suffix(project_id, ".summary.json")
            .into_iter()
            .take(limit)
            .filter_map(|path| {
                let contents = std::fs::read_to_string(&path).ok()?;
                match serde_json::from_str(&contents) {
                    Ok(summary) => Some(summary),
                    Err(e) => {
                        debug!("skipping corrupt summary {}: {e}", path.display());
                        None
                    }
                }
            })
            .collect()
    }

    /// The raw content of the newest session log, if any.
    pub fn last_session_output(&self, project_id: &str) -> Option<String> {
        let path = self.files_with_suffix(project_id, ".log").into_iter().next()?;
        match std::fs::read(&path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("cannot read {}: {e}", path.display());
                None
            }
        }
    }

    /// The context string injected into a new session: the last three
    /// previews framed by literal markers, or empty when there is nothing
    /// to carry over.
    pub fn context_summary(&self, project_id: &str) -> String {
        let previews: Vec<String> = self
            .summaries(project_id, CONTEXT_SESSIONS)
            .into_iter()
            .map(|s| s.preview)
            .filter(|p| !p.trim().is_empty())
            .collect();

        if previews.is_empty() {
            return String::new();
        }
        format!(
            "{CONTEXT_HEADER}\n{}\n{CONTEXT_FOOTER}",
            previews.join("\n\n")
        )
    }

    /// Matching files in the project directory, sorted by filename
    /// descending (newest first, thanks to the epoch-ms prefix).
    fn files_with_suffix(&self, project_id: &str, suffix: &str) -> Vec<PathBuf> {
        let dir = self.project_dir(project_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.ends_with(suffix))
            .collect();
        names.sort_by(|a, b| b.cmp(a));
        names.into_iter().map(|name| dir.join(name)).collect()
    }
}

/// Append-only writer for one session's log, finalized exactly once.
#[derive(Debug)]
pub struct HistoryWriter {
    log_path: PathBuf,
    summary_path: PathBuf,
    file: Option<File>,
    session_id: String,
    start_ms: i64,
    finalized: bool,
}

impl HistoryWriter {
    /// Append raw PTY bytes. I/O errors are logged, never propagated.
    pub fn append(&mut self, data: &[u8]) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(e) = file.write_all(data) {
            warn!("history append failed for {}: {e}", self.log_path.display());
            self.file = None;
        }
    }

    /// Close the log and rewrite the summary with the end time and the
    /// trailing preview. Idempotent.
    pub fn finalize(&mut self, end_ms: i64) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        if let Some(file) = self.file.take() {
            drop(file);
        }
        self.write_summary(Some(end_ms));
    }

    fn write_summary(&mut self, end_ms: Option<i64>) {
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            start_time: self.start_ms,
            end_time: end_ms,
            preview: tail_of_file(&self.log_path, PREVIEW_BYTES),
        };
        let json = match serde_json::to_string_pretty(&summary) {
            Ok(json) => json,
            Err(e) => {
                warn!("cannot serialize summary for {}: {e}", self.session_id);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.summary_path, json) {
            warn!(
                "cannot write summary {}: {e}",
                self.summary_path.display()
            );
        }
    }
}

impl Drop for HistoryWriter {
    fn drop(&mut self) {
        // Process exit still closes the pair.
        if !self.finalized {
            self.finalize(chrono::Utc::now().timestamp_millis());
        }
    }
}

/// The last `max` bytes of a file, lossily decoded. Empty on any error.
fn tail_of_file(path: &Path, max: u64) -> String {
    let Ok(mut file) = File::open(path) else {
        return String::new();
    };
    let Ok(meta) = file.metadata() else {
        return String::new();
    };
    let start = meta.len().saturating_sub(max);
    if file.seek(SeekFrom::Start(start)).is_err() {
        return String::new();
    }
    let mut buf = Vec::with_capacity(max as usize);
    if file.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn writer_creates_log_and_summary_pair() {
        let (_dir, store) = store();
        let mut writer = store.create_writer("demo", "sess-1", 1000);
        writer.append(b"hello\n");
        writer.finalize(2000);

        let summaries = store.summaries("demo", DEFAULT_HISTORY_LIMIT);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].session_id, "sess-1");
        assert_eq!(summaries[0].start_time, 1000);
        assert_eq!(summaries[0].end_time, Some(2000));
        assert_eq!(summaries[0].preview, "hello\n");
    }

    #[test]
    fn finalize_is_idempotent() {
        let (_dir, store) = store();
        let mut writer = store.create_writer("demo", "sess-1", 1000);
        writer.append(b"one");
        writer.finalize(2000);
        writer.append(b"ignored after close");
        writer.finalize(9000);

        let summaries = store.summaries("demo", DEFAULT_HISTORY_LIMIT);
        assert_eq!(summaries[0].end_time, Some(2000));
        assert_eq!(summaries[0].preview, "one");
    }

    #[test]
    fn preview_keeps_only_the_tail() {
        let (_dir, store) = store();
        let mut writer = store.create_writer("demo", "sess-1", 1000);
        writer.append(&vec![b'x'; 600]);
        writer.append(b"END");
        writer.finalize(2000);

        let summary = &store.summaries("demo", 1)[0];
        assert_eq!(summary.preview.len(), 500);
        assert!(summary.preview.ends_with("END"));
    }

    #[test]
    fn summaries_are_newest_first() {
        let (_dir, store) = store();
        for (start, id) in [(1000, "a"), (3000, "c"), (2000, "b")] {
            let mut w = store.create_writer("demo", id, start);
            w.append(id.as_bytes());
            w.finalize(start + 10);
        }

        let summaries = store.summaries("demo", DEFAULT_HISTORY_LIMIT);
        let ids: Vec<&str> = summaries.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn summaries_respect_limit() {
        let (_dir, store) = store();
        for i in 0..15 {
            let mut w = store.create_writer("demo", &format!("s{i}"), 1000 + i);
            w.finalize(2000 + i);
        }
        assert_eq!(store.summaries("demo", 10).len(), 10);
    }

    #[test]
    fn last_session_output_reads_newest_log() {
        let (_dir, store) = store();
        let mut w1 = store.create_writer("demo", "old", 1000);
        w1.append(b"old output");
        w1.finalize(1500);
        let mut w2 = store.create_writer("demo", "new", 2000);
        w2.append(b"new output");
        w2.finalize(2500);

        assert_eq!(
            store.last_session_output("demo").as_deref(),
            Some("new output")
        );
    }

    #[test]
    fn queries_on_unknown_project_are_empty() {
        let (_dir, store) = store();
        assert!(store.summaries("ghost", 10).is_empty());
        assert!(store.last_session_output("ghost").is_none());
        assert_eq!(store.context_summary("ghost"), "");
    }

    #[test]
    fn context_summary_frames_last_three_previews() {
        let (_dir, store) = store();
        for (start, text) in [(1000, "first"), (2000, "second"), (3000, "third"), (4000, "fourth")]
        {
            let mut w = store.create_writer("demo", &format!("s{start}"), start);
            w.append(text.as_bytes());
            w.finalize(start + 10);
        }

        let context = store.context_summary("demo");
        assert!(context.starts_with("=== Previous Session Context ===\n"));
        assert!(context.ends_with("\n=== End of Previous Context ==="));
        // Newest three only.
        assert!(context.contains("fourth"));
        assert!(context.contains("third"));
        assert!(context.contains("second"));
        assert!(!context.contains("first"));
    }

    #[test]
    fn context_summary_skips_empty_previews() {
        let (_dir, store) = store();
        let mut w = store.create_writer("demo", "empty", 1000);
        w.finalize(1100);
        assert_eq!(store.context_summary("demo"), "");
    }

    #[test]
    fn unwritable_root_disables_writer_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file in the way").unwrap();
        let store = HistoryStore::new(blocker);

        let mut writer = store.create_writer("demo", "sess-1", 1000);
        // No panic, appends become no-ops.
        writer.append(b"dropped");
        writer.finalize(2000);
    }

    #[test]
    fn corrupt_summary_files_are_skipped() {
        let (_dir, store) = store();
        let mut w = store.create_writer("demo", "good", 2000);
        w.append(b"ok");
        w.finalize(2100);

        let dir = store.project_dir("demo");
        std::fs::write(dir.join("9999-bad.summary.json"), "not json").unwrap();

        let summaries = store.summaries("demo", 10);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].session_id, "good");
    }
}
