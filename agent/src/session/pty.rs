//! PTY spawning and process handles via `portable-pty`.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open PTY: {0}")]
    Open(String),
    #[error("failed to spawn shell: {0}")]
    Spawn(String),
    #[error("PTY write failed: {0}")]
    Write(String),
}

/// Handle to a running shell inside a PTY.
///
/// The session exclusively owns its PTY: writes go through this handle and
/// the single reader is handed out once at spawn time. The master side is
/// held for the handle's lifetime; dropping it would hang up the slave.
pub struct PtyHandle {
    _master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send>>>,
    alive: Arc<AtomicBool>,
}

impl PtyHandle {
    /// Write raw bytes to the shell's stdin side.
    pub fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| PtyError::Write(format!("writer lock poisoned: {e}")))?;
        writer
            .write_all(data)
            .and_then(|_| writer.flush())
            .map_err(|e| PtyError::Write(e.to_string()))
    }

    /// Kill the child process. Idempotent.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }

    #[allow(dead_code)]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Flag the reader thread clears on EOF.
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }
}

/// The platform's interactive shell.
pub fn platform_shell() -> &'static str {
    if cfg!(windows) {
        "cmd.exe"
    } else {
        "bash"
    }
}

/// Spawn the platform shell in a fresh PTY.
///
/// The child inherits the agent's environment plus `TERM=xterm-256color`,
/// runs in `cwd`, and gets a `cols`×`rows` terminal. Returns the handle and
/// the single output reader.
pub fn spawn_shell(
    cwd: &Path,
    cols: u16,
    rows: u16,
) -> Result<(PtyHandle, Box<dyn Read + Send>), PtyError> {
    let pty_system = native_pty_system();

    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| PtyError::Open(e.to_string()))?;

    let mut cmd = CommandBuilder::new(platform_shell());
    cmd.env("TERM", "xterm-256color");
    cmd.cwd(cwd);

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| PtyError::Spawn(e.to_string()))?;
    drop(pair.slave);

    let writer = pair
        .master
        .take_writer()
        .map_err(|e| PtyError::Open(format!("failed to take writer: {e}")))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| PtyError::Open(format!("failed to clone reader: {e}")))?;

    let handle = PtyHandle {
        _master: Arc::new(Mutex::new(pair.master)),
        writer: Arc::new(Mutex::new(writer)),
        child: Arc::new(Mutex::new(child)),
        alive: Arc::new(AtomicBool::new(true)),
    };

    Ok((handle, reader))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_shell_matches_target() {
        #[cfg(windows)]
        assert_eq!(platform_shell(), "cmd.exe");
        #[cfg(not(windows))]
        assert_eq!(platform_shell(), "bash");
    }

    #[cfg(unix)]
    #[test]
    fn spawn_write_and_kill() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, mut reader) = spawn_shell(dir.path(), 80, 24).expect("spawn shell");
        assert!(handle.is_alive());

        handle.write(b"echo pty-works\r").expect("write");

        // The echoing shell must produce the marker within a few reads.
        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        for _ in 0..50 {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&collected).contains("pty-works") {
                        break;
                    }
                }
            }
        }
        assert!(
            String::from_utf8_lossy(&collected).contains("pty-works"),
            "shell output missing marker: {:?}",
            String::from_utf8_lossy(&collected)
        );

        handle.kill();
        assert!(!handle.is_alive());
    }
}
